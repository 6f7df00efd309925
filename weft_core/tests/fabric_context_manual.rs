use std::time::Duration;
use weft_core::{FabricContext, FabricSpindown, TerminationCause};

/// The global context and spindown registry are process-wide singletons, so
/// this file holds a single test that exercises the full terminate-and-drain
/// cycle in one process.
#[tokio::test(flavor = "multi_thread")]
async fn manual_termination_drains_workloads() {
    // Given: a child token and a background workload that cleans up on
    // termination, under an explicit shutdown budget
    FabricSpindown::set_shutdown_budget(Duration::from_secs(2));
    let child = FabricContext::child_token();
    let token = FabricSpindown::register("test:workload");

    let workload = tokio::spawn(async move {
        FabricContext::terminated().await;

        // Simulate brief clean-up before punching out
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.punch_out();
    });

    assert!(FabricContext::is_alive());
    assert_eq!(FabricContext::termination_cause(), None);
    assert!(!child.is_cancelled());

    // When
    weft_core::weft_shutdown().await;

    // Then
    assert!(FabricContext::is_terminated());
    assert_eq!(
        FabricContext::termination_cause(),
        Some(TerminationCause::Requested),
    );
    assert!(child.is_cancelled());
    assert!(workload.await.is_ok());

    // Repeated termination produces no additional effect
    FabricContext::terminate();
    assert!(FabricContext::is_terminated());
}
