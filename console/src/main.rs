mod buffer;
mod control;
mod error;
mod session;
mod socket;

use buffer::LogBuffer;
use clap::Parser;
use control::ControlPlaneClient;
use log::info;
use session::SessionController;
use shared::{InstanceId, LifecycleState, LifecycleTarget};
use socket::WsConnector;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the management server
    #[arg(short = 's', long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Instance to attach the console to
    instance: String,

    /// Keep at most this many log lines (0 = unlimited)
    #[arg(long, default_value = "0")]
    scrollback: usize,

    /// Do not assume the instance is already running on attach
    #[arg(long)]
    detached: bool,

    /// Seconds between reconnect attempts while a socket is wanted
    #[arg(long, default_value = "3")]
    retry_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let instance: InstanceId = args.instance.parse()?;

    info!("Attaching console to {} via {}", instance, args.server);

    let buffer = if args.scrollback > 0 {
        LogBuffer::with_capacity(args.scrollback)
    } else {
        LogBuffer::new()
    };
    let mut controller = SessionController::mount_with_buffer(
        instance,
        WsConnector::new(&args.server),
        ControlPlaneClient::new(&args.server),
        buffer,
    );

    // The view mounts onto a console that is usually already live.
    if !args.detached {
        controller.observe_lifecycle(LifecycleState::Running).await;
    }

    println!("Commands are sent verbatim; /start /stop /restart /quit are local.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut retry = tokio::time::interval(Duration::from_secs(args.retry_secs.max(1)));
    // Marks how far the view has printed: (generation, sequence).
    let mut printed: Option<(u32, u64)> = None;

    loop {
        tokio::select! {
            event = controller.next_event() => {
                controller.handle_event(event).await;
                flush_new_lines(&controller, &mut printed);
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let done = handle_input(&mut controller, input).await;
                flush_new_lines(&controller, &mut printed);
                if done {
                    break;
                }
            }
            _ = retry.tick() => {
                // Retries a failed connect while the lifecycle still wants one.
                controller.reevaluate().await;
            }
        }

        if let Some(error) = controller.take_last_error() {
            eprintln!("! {}", error);
        }
    }

    controller.unmount();
    Ok(())
}

/// Handles one line of user input; returns true when the session should end.
async fn handle_input(
    controller: &mut SessionController<WsConnector, ControlPlaneClient>,
    input: &str,
) -> bool {
    let lifecycle = match input {
        "/quit" => return true,
        "/start" => Some(LifecycleTarget::Start),
        "/stop" => Some(LifecycleTarget::Stop),
        "/restart" => Some(LifecycleTarget::Restart),
        _ => None,
    };

    let result = match lifecycle {
        Some(target) => controller.set_lifecycle(target).await,
        None => controller.send_command(input),
    };
    if let Err(error) = result {
        eprintln!("! {}", error);
    }
    false
}

/// Prints every log line the view has not shown yet, in append order.
fn flush_new_lines(
    controller: &SessionController<WsConnector, ControlPlaneClient>,
    printed: &mut Option<(u32, u64)>,
) {
    for line in controller.snapshot() {
        let position = (line.generation, line.sequence);
        if printed.map_or(true, |last| position > last) {
            println!("{}", line.text);
            *printed = Some(position);
        }
    }
}
