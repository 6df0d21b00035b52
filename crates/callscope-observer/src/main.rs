use std::io::Write;

use callscope_observer::ingest::{ObservedRecord, ingest_connection};
use facet::Facet;
use figue as args;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

const LISTEN_ENV: &str = "CALLSCOPE_LISTEN";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9229";

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// Print records without the originating process and connection.
    #[facet(args::named, default)]
    bare: bool,
}

fn main() {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async {
            if let Err(err) = run().await {
                eprintln!("{err}");
                std::process::exit(1);
            }
        });
}

async fn run() -> Result<(), String> {
    let cli = parse_cli()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let listen_addr =
        std::env::var(LISTEN_ENV).unwrap_or_else(|_| String::from(DEFAULT_LISTEN_ADDR));
    let listener = TcpListener::bind(&listen_addr)
        .await
        .map_err(|e| format!("failed to bind TCP on {listen_addr}: {e}"))?;
    info!(%listen_addr, "callscope-observer listening");
    print_startup_hints(&listen_addr);

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(print_records(rx, cli.bare));

    let mut next_conn_id: u64 = 1;
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| format!("accept failed: {e}"))?;
        let conn_id = next_conn_id;
        next_conn_id += 1;
        info!(conn_id, %peer, "relay connected");

        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = ingest_connection(stream, conn_id, tx).await {
                warn!(conn_id, %e, "relay connection failed");
            }
            info!(conn_id, "relay disconnected");
        });
    }
}

/// Sole writer to stdout, so lines from concurrent connections never interleave.
async fn print_records(mut rx: mpsc::UnboundedReceiver<ObservedRecord>, bare: bool) {
    let mut stdout = std::io::stdout();
    while let Some(observed) = rx.recv().await {
        let record = &observed.record;
        info!(
            conn_id = observed.conn_id,
            method = %record.method,
            trace_id = record.trace_id().unwrap_or("-"),
            terminal = record.is_terminal(),
            "call record"
        );
        let line = if bare {
            observed.json
        } else {
            let process = facet_json::to_string(&observed.process_name)
                .unwrap_or_else(|_| String::from("null"));
            format!(
                "{{\"conn\":{},\"process\":{},\"record\":{}}}",
                observed.conn_id, process, observed.json
            )
        };
        if writeln!(stdout, "{line}").is_err() {
            return;
        }
    }
}

fn parse_cli() -> Result<Cli, String> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("callscope-observer")
                .description("Receives relayed RPC call records and prints them as JSON lines")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();
    let cli = args::Driver::new(figue_config)
        .run()
        .into_result()
        .map_err(|e| e.to_string())?;
    Ok(cli.value)
}

fn print_startup_hints(listen_addr: &str) {
    eprintln!();
    eprintln!("  Point instrumented processes here:");
    eprintln!();
    eprintln!("    CALLSCOPE_OBSERVER={listen_addr} <your-binary>");
    eprintln!();
}
