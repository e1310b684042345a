//! Subscriber setup for binaries and demos. The library itself only emits events.

use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, falling back to `default_directives` when the variable
/// is unset. Fails if a global subscriber is already installed.
///
/// With `with_spans` set every refresh cycle's span is logged on close along with its timing.
pub fn init_tracing(default_directives: &str, with_spans: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directives))?;

    let span_events = if with_spans {
        FmtSpan::CLOSE
    }
    else {
        FmtSpan::NONE
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_span_events(span_events))
        .try_init()?;

    info!("Tracing initialized");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails() {
        // Either this call installs the subscriber or another test in the process already did.
        let _ = init_tracing("refresh_cache=debug", false);
        assert!(init_tracing("refresh_cache=debug", false).is_err());
    }
}
