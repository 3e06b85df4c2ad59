use a11ypulse_ipc::{Command, Response};

use crate::engine::Engine;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Answer a control command. Quit is acknowledged here and acted on by the caller.
pub fn process_command(engine: &Engine, cmd: &Command) -> Response {
    match cmd {
        Command::Ping => Response::Pong {
            version: VERSION.to_string(),
        },
        Command::Status => Response::Status {
            status: engine.status(),
        },
        Command::Quit => {
            tracing::info!("Quit command received");
            Response::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use crate::multiplexer::mock::FakeNotifierFactory;
    use crate::platform::mock::{MockProcesses, MockSettings};
    use crate::platform::Platform;
    use crate::telemetry::mock::RecordingSink;
    use std::sync::Arc;

    fn start_engine() -> Engine {
        let platform = Platform {
            settings: Arc::new(MockSettings::new().with_cursor_size(Some(64))),
            notifiers: Arc::new(FakeNotifierFactory::new()),
            processes: Arc::new(MockProcesses::new()),
        };
        Engine::start(Config::default(), platform, Arc::new(RecordingSink::new())).unwrap()
    }

    #[test]
    fn test_ping() {
        let engine = start_engine();
        let response = process_command(&engine, &Command::Ping);
        assert!(matches!(response, Response::Pong { version } if version == VERSION));
        engine.shutdown();
    }

    #[test]
    fn test_status_reports_baselines() {
        let engine = start_engine();
        match process_command(&engine, &Command::Status) {
            Response::Status { status } => {
                assert_eq!(status.cursor_size, Some(64));
                assert_eq!(status.high_contrast, Some(false));
                assert!(!status.watched_keys.is_empty());
            }
            other => panic!("unexpected response: {:?}", other),
        }
        engine.shutdown();
    }

    #[test]
    fn test_quit_is_acknowledged() {
        let engine = start_engine();
        assert!(matches!(
            process_command(&engine, &Command::Quit),
            Response::Ok
        ));
        engine.shutdown();
    }
}
