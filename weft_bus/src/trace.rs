use crate::headers::{HEADER_TRACEPARENT, HEADER_TRACESTATE};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// A W3C trace context carried across the fabric in the `traceparent` and
/// `tracestate` headers.
///
/// Injection emits the version-00 form
/// `00-<32 hex trace id>-<16 hex span id>-<01|00>`. Extraction is strict but
/// silent: any deviation from the well-formed shape (wrong version, wrong
/// field lengths, non-hex characters, all-zero identifiers) yields
/// [`None`] rather than an error, so a malformed upstream header can never
/// fail a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// The 128-bit trace identifier shared by every span of the trace.
    trace_id: u128,
    /// The 64-bit identifier of the current span.
    span_id: u64,
    /// Whether the trace is sampled (the `01` flag).
    sampled: bool,
    /// Opaque vendor state, passed through verbatim.
    state: Option<Arc<str>>,
}

impl TraceContext {
    /// Starts a brand new sampled trace with fresh identifiers.
    pub fn generate() -> Self {
        Self {
            trace_id: nonzero_trace_id(),
            span_id: nonzero_span_id(),
            sampled: true,
            state: None,
        }
    }

    /// Derives a child context: same trace identifier and state, fresh span
    /// identifier.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: nonzero_span_id(),
            sampled: self.sampled,
            state: self.state.clone(),
        }
    }

    /// Exposes the trace identifier.
    pub fn trace_id(&self) -> u128 {
        self.trace_id
    }

    /// Exposes the span identifier.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Reports whether the trace is sampled.
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    /// Exposes the opaque vendor state, if any.
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }
}

impl TraceContext {
    /// Writes this context into the given header map: `traceparent` always,
    /// `tracestate` when vendor state is present.
    pub fn inject(&self, headers: &mut HashMap<String, String>) {
        headers.insert(HEADER_TRACEPARENT.to_string(), self.to_string());

        if let Some(state) = &self.state {
            headers.insert(HEADER_TRACESTATE.to_string(), state.to_string());
        }
    }

    /// Reads a remote context out of the given header map.
    ///
    /// Returns a context only when the `traceparent` value has version `00`
    /// and exactly 32/16/2 hex characters in its three remaining fields;
    /// anything else silently yields [`None`].
    pub fn extract(headers: &HashMap<String, String>) -> Option<Self> {
        let traceparent = headers.get(HEADER_TRACEPARENT)?;

        let mut parts = traceparent.split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        // Version 00 has exactly four fields
        if parts.next().is_some() {
            return None;
        }

        if version != "00" || trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return None;
        }

        let trace_id = u128::from_str_radix(trace_id, 16).ok()?;
        let span_id = u64::from_str_radix(span_id, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;

        // All-zero identifiers are explicitly invalid
        if trace_id == 0 || span_id == 0 {
            return None;
        }

        let state = headers
            .get(HEADER_TRACESTATE)
            .map(|value| Arc::from(value.as_str()));

        Some(Self {
            trace_id,
            span_id,
            sampled: flags & 0x01 == 0x01,
            state,
        })
    }
}

impl Display for TraceContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id,
            self.span_id,
            if self.sampled { 0x01u8 } else { 0x00u8 },
        )
    }
}

/// Draws a random non-zero 128-bit trace identifier.
fn nonzero_trace_id() -> u128 {
    loop {
        let candidate = Uuid::new_v4().as_u128();
        if candidate != 0 {
            return candidate;
        }
    }
}

/// Draws a random non-zero 64-bit span identifier.
fn nonzero_span_id() -> u64 {
    loop {
        let candidate = Uuid::new_v4().as_u128() as u64;
        if candidate != 0 {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn headers_with(traceparent: &str) -> HashMap<String, String> {
        HashMap::from([(HEADER_TRACEPARENT.to_string(), traceparent.to_string())])
    }

    #[test]
    fn inject_then_extract_is_identity() {
        // Given
        let context = TraceContext::generate();
        let mut headers = HashMap::new();

        // When
        context.inject(&mut headers);
        let extracted = TraceContext::extract(&headers).unwrap();

        // Then
        assert_eq!(extracted.trace_id(), context.trace_id());
        assert_eq!(extracted.span_id(), context.span_id());
        assert_eq!(extracted.is_sampled(), context.is_sampled());
    }

    #[test]
    fn child_keeps_trace_id_and_rerolls_span_id() {
        // Given
        let parent = TraceContext::generate();

        // When
        let child = parent.child();

        // Then
        assert_eq!(child.trace_id(), parent.trace_id());
        assert_ne!(child.span_id(), parent.span_id());
    }

    #[test]
    fn well_formed_traceparent_extracts() {
        let headers = headers_with("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01");

        let context = TraceContext::extract(&headers).unwrap();

        assert_eq!(context.trace_id(), 0x0af7651916cd43dd8448eb211c80319c);
        assert_eq!(context.span_id(), 0xb7ad6b7169203331);
        assert!(context.is_sampled());
    }

    #[test]
    fn unsampled_flag_is_recognized() {
        let headers = headers_with("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-00");

        assert!(!TraceContext::extract(&headers).unwrap().is_sampled());
    }

    #[test]
    fn deviations_silently_yield_none() {
        // Wrong version
        let headers = headers_with("01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01");
        assert_eq!(TraceContext::extract(&headers), None);

        // Truncated trace id
        let headers = headers_with("00-0af7651916cd43dd-b7ad6b7169203331-01");
        assert_eq!(TraceContext::extract(&headers), None);

        // Truncated span id
        let headers = headers_with("00-0af7651916cd43dd8448eb211c80319c-b7ad6b71-01");
        assert_eq!(TraceContext::extract(&headers), None);

        // Non-hex characters
        let headers = headers_with("00-zzf7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01");
        assert_eq!(TraceContext::extract(&headers), None);

        // All-zero trace id
        let headers = headers_with("00-00000000000000000000000000000000-b7ad6b7169203331-01");
        assert_eq!(TraceContext::extract(&headers), None);

        // Trailing field
        let headers = headers_with("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-x");
        assert_eq!(TraceContext::extract(&headers), None);

        // Missing header entirely
        assert_eq!(TraceContext::extract(&HashMap::new()), None);
    }

    #[test]
    fn tracestate_passes_through() {
        // Given
        let mut headers = headers_with("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01");
        headers.insert(HEADER_TRACESTATE.to_string(), "vendor=opaque".to_string());

        // When
        let context = TraceContext::extract(&headers).unwrap();
        let mut reinjected = HashMap::new();
        context.inject(&mut reinjected);

        // Then
        assert_eq!(context.state(), Some("vendor=opaque"));
        assert_eq!(
            reinjected.get(HEADER_TRACESTATE).map(String::as_str),
            Some("vendor=opaque"),
        );
    }
}
