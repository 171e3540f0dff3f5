use std::process;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use waitroom::{Gate, GateConfig, GuardedError, PollState, WaitView, Waitroom, follow};

struct Args {
    base_url: Option<String>,
    gate: Gate,
    session_token: Option<String>,
    hold: Duration,
    json: bool,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: waitroom-probe [<base_url>] [--gate entry|capacity] [--session-token <token>] [--hold <secs>] [--json]");
            eprintln!();
            eprintln!("Arguments:");
            eprintln!("  <base_url>               Queue service base URL [env: WAITROOM_BASE_URL]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --gate <gate>            Gate to pass: entry or capacity [default: entry]");
            eprintln!("  --session-token <token>  Session credential [env: WAITROOM_SESSION_TOKEN]");
            eprintln!("  --hold <secs>            Seconds to hold admission before finishing [default: 0]");
            eprintln!("  --json                   Print wait snapshots as JSON lines");
            process::exit(2);
        }
    };

    init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            process::exit(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(PollState::Allowed) => {}
        Ok(state) => {
            eprintln!("flow ended: {state:?}");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        base_url: None,
        gate: Gate::Entry,
        session_token: None,
        hold: Duration::ZERO,
        json: false,
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--gate" => {
                i += 1;
                parsed.gate = match args.get(i).map(String::as_str) {
                    Some("entry") => Gate::Entry,
                    Some("capacity") => Gate::Capacity,
                    Some(other) => {
                        return Err(format!("invalid gate '{other}', expected 'entry' or 'capacity'"));
                    }
                    None => return Err("--gate requires a value".to_string()),
                };
            }
            "--session-token" => {
                i += 1;
                parsed.session_token = Some(args.get(i).ok_or("--session-token requires a value")?.clone());
            }
            "--hold" => {
                i += 1;
                let raw = args.get(i).ok_or("--hold requires a value")?;
                let secs = raw
                    .parse::<f64>()
                    .map_err(|e| format!("invalid --hold value '{raw}': {e}"))?;
                parsed.hold = Duration::try_from_secs_f64(secs)
                    .map_err(|e| format!("invalid --hold value '{raw}': {e}"))?;
            }
            "--json" => parsed.json = true,
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => {
                if parsed.base_url.is_some() {
                    return Err(format!("unexpected argument: {arg}"));
                }
                parsed.base_url = Some(arg.to_string());
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// Initialize tracing with WAITROOM_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("WAITROOM_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("error") => "error",
            Ok("info") => "info",
            _ => "warn",
        };
        EnvFilter::new(format!("waitroom={level},waitroom_probe={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn build_config(args: &Args) -> anyhow::Result<GateConfig> {
    let mut config = match args.base_url {
        Some(ref url) => {
            let mut config = GateConfig::new(url.clone());
            if let Ok(token) = std::env::var("WAITROOM_SESSION_TOKEN")
                && !token.is_empty()
            {
                config = config.with_session_token(token);
            }
            config
        }
        None => GateConfig::from_env().context("no base URL given")?,
    };

    if let Some(ref token) = args.session_token {
        config = config.with_session_token(token.clone());
    }

    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<PollState> {
    let config = build_config(&args)?;
    info!(base_url = %config.base_url, gate = %args.gate, "Joining waiting room");

    let room = Waitroom::connect(config).context("failed to build HTTP client")?;
    let mut release_failures = room.subscribe_release_failures();

    let hold = args.hold;
    let json = args.json;
    let action = move || async move {
        tokio::time::sleep(hold).await;
        Ok::<_, std::convert::Infallible>(())
    };

    let (handle, result) = match args.gate {
        Gate::Entry => {
            let flow = room.entry_flow();
            let handle = flow.handle();
            let presenter = tokio::spawn(follow(handle.subscribe(), move |view| render(view, json)));
            let result = run_until_interrupted(&handle, flow.run(action)).await;
            let _ = presenter.await;
            (handle, result)
        }
        Gate::Capacity => {
            let flow = room.capacity_flow();
            let handle = flow.handle();
            let presenter = tokio::spawn(follow(handle.subscribe(), move |view| render(view, json)));
            let result = run_until_interrupted(&handle, flow.run(action)).await;
            let _ = presenter.await;
            (handle, result)
        }
    };

    if let Ok(failure) = release_failures.try_recv() {
        warn!(error = %failure, "Checkout slot may not have been released");
    }

    match result {
        Ok(()) => {
            info!("Admitted and finished");
            Ok(handle.state())
        }
        Err(GuardedError::Admission(e)) if e.is_cancelled() => Ok(PollState::Cancelled),
        Err(GuardedError::Admission(e)) => Err(e.into()),
        Err(GuardedError::Action(never)) => match never {},
    }
}

/// Ctrl-C tears the flow down the same way leaving the page does.
async fn run_until_interrupted<F, T>(handle: &waitroom::PollHandle, flow: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let _teardown = handle.teardown_guard();
    tokio::pin!(flow);

    tokio::select! {
        result = &mut flow => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, leaving the queue");
            handle.cancel();
            flow.await
        }
    }
}

fn render(view: &WaitView, json: bool) {
    if json {
        match serde_json::to_string(view) {
            Ok(line) => eprintln!("{line}"),
            Err(e) => warn!(error = %e, "Failed to encode wait view"),
        }
        return;
    }

    if let Some(headline) = view.headline() {
        eprintln!("{headline}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("waitroom-probe")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parse_defaults() {
        let args = parse_args(&argv(&["http://localhost:8080"])).unwrap();
        assert_eq!(args.base_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(args.gate, Gate::Entry);
        assert_eq!(args.hold, Duration::ZERO);
        assert!(!args.json);
    }

    #[test]
    fn parse_all_flags() {
        let args = parse_args(&argv(&[
            "--gate",
            "capacity",
            "--session-token",
            "sess-9",
            "--hold",
            "1.5",
            "--json",
            "http://queue",
        ]))
        .unwrap();
        assert_eq!(args.gate, Gate::Capacity);
        assert_eq!(args.session_token.as_deref(), Some("sess-9"));
        assert_eq!(args.hold, Duration::from_millis(1500));
        assert!(args.json);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(parse_args(&argv(&["--gate", "side-door"])).is_err());
        assert!(parse_args(&argv(&["--hold", "-1"])).is_err());
        assert!(parse_args(&argv(&["--hold", "NaN"])).is_err());
        assert!(parse_args(&argv(&["--hold", "1e300"])).is_err());
        assert!(parse_args(&argv(&["--bogus"])).is_err());
        assert!(parse_args(&argv(&["a", "b"])).is_err());
        assert_eq!(parse_args(&argv(&["--help"])).err().as_deref(), Some(""));
    }

    #[test]
    fn config_prefers_flag_token() {
        let args = parse_args(&argv(&["http://queue", "--session-token", "from-flag"])).unwrap();
        let config = build_config(&args).unwrap();
        assert_eq!(config.base_url, "http://queue");
        assert_eq!(config.session_token.as_deref(), Some("from-flag"));
    }
}
