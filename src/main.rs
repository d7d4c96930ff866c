use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{error, Level};

use comarkup::{FrameworkId, PreviewConfig};

#[derive(Parser)]
#[command(name = "comarkup")]
#[command(version)]
#[command(about = "Detect framework snippets and preview them in a sandbox")]
#[command(after_help = "EXAMPLES:\n  \
    # Which framework is this snippet written for?\n  \
    comarkup detect Counter.jsx\n\n  \
    # List the code blocks on a page\n  \
    comarkup scan https://example.com/docs\n\n  \
    # Render a snippet through the relay and the sandbox\n  \
    comarkup preview widget.js\n\n  \
    # Start the screenshot server\n  \
    comarkup serve --port 3000\n\
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// No logging except for errors
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Verbose logging (-v) or trace logging (-vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the framework a snippet is written for
    Detect {
        /// File to read, or `-` for stdin
        input: String,

        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the code blocks of a page with their detected frameworks
    Scan {
        /// http(s) URL or local HTML file
        source: String,

        /// Print the blocks as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render a snippet in process: badge, relay and popup with the sandboxed executor
    Preview {
        /// File to read, or `-` for stdin
        input: String,

        /// Render with this framework instead of the detected one
        #[arg(long)]
        framework: Option<FrameworkId>,

        /// Serve a runtime script from disk instead of the network (URL=PATH, repeatable)
        #[arg(long = "bundle", value_parser = parse_bundle)]
        bundles: Vec<(String, PathBuf)>,

        /// Never fetch runtime scripts over the network
        #[arg(long)]
        offline: bool,
    },

    /// Start the HTTP render server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PORT", default_value_t = 3000)]
        port: u16,

        /// Host address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Directory screenshots are written to
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Directory with replacement page templates
        #[arg(long)]
        templates: Option<PathBuf>,

        /// Screenshots kept by the cleanup sweep
        #[arg(long, default_value_t = 10)]
        keep: usize,
    },
}

fn parse_bundle(s: &str) -> Result<(String, PathBuf), String> {
    let (url, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected URL=PATH, got `{}`", s))?;
    Ok((url.to_string(), PathBuf::from(path)))
}

fn init_logger(quiet: bool, verbose: u8) {
    let level = if quiet {
        Level::Error
    } else if verbose == 0 {
        Level::Info
    } else if verbose == 1 {
        Level::Debug
    } else {
        Level::Trace
    };

    let mut builder = env_logger::builder();
    if level == Level::Trace {
        builder.filter_level(level.to_level_filter());
    } else if level == Level::Debug {
        builder.filter_module("comarkup", level.to_level_filter());
    } else {
        builder
            .filter_module("comarkup", level.to_level_filter())
            .format(|buf, record| {
                if record.level() == Level::Info {
                    writeln!(buf, "{}", record.args())
                } else {
                    let log_style = buf.default_level_style(record.level());
                    writeln!(buf, "{log_style}[{}]{log_style:#} {}", record.level(), record.args())
                }
            });
    }
    let _ = builder.try_init();
}

fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut code = String::new();
        io::stdin().read_to_string(&mut code).context("reading stdin")?;
        Ok(code)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading {}", input))
    }
}

fn detect(input: &str, json: bool) -> anyhow::Result<()> {
    let code = read_input(input)?;
    let analysis = comarkup::analyze(&code);
    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        println!("{} ({})", analysis.name, analysis.framework);
        if !analysis.patterns.is_empty() {
            println!("matched: {}", analysis.patterns.join(", "));
        }
    }
    Ok(())
}

#[cfg(feature = "scan")]
fn scan(source: &str, json: bool) -> anyhow::Result<()> {
    let html = comarkup::scan::load_source(source, &PreviewConfig::default())?;
    let blocks = comarkup::scan::extract_code_blocks(&html)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&blocks)?);
        return Ok(());
    }
    for block in &blocks {
        let first_line = block.code.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
        println!(
            "#{} {} [{}] {}",
            block.index,
            block.analysis.name,
            block.language.as_deref().unwrap_or("-"),
            first_line.trim()
        );
    }
    if blocks.is_empty() {
        println!("no code blocks found");
    }
    Ok(())
}

#[cfg(not(feature = "scan"))]
fn scan(_source: &str, _json: bool) -> anyhow::Result<()> {
    bail!("comarkup was built without the `scan` feature")
}

#[cfg(feature = "sandbox")]
fn preview(
    input: &str,
    framework: Option<FrameworkId>,
    bundles: Vec<(String, PathBuf)>,
    offline: bool,
) -> anyhow::Result<()> {
    use std::sync::{mpsc, Arc};

    use comarkup::{
        Badge, ChannelTransport, HttpFetcher, Popup, PopupEvent, Relay, RelayClient, RelayHandle, RenderStatus,
        RequesterId, SandboxExecutor, ScriptFetcher, StaticFetcher, SystemClock,
    };

    let code = read_input(input)?;
    let config = PreviewConfig::default();
    let framework = framework.unwrap_or_else(|| comarkup::detect(&code));
    log::info!("rendering as {}", framework);

    let mut fetcher = StaticFetcher::new();
    for (url, path) in &bundles {
        let source = std::fs::read_to_string(path).with_context(|| format!("reading bundle {}", path.display()))?;
        fetcher.insert(url.clone(), source);
    }
    let use_network = !offline && bundles.is_empty();

    let transport = ChannelTransport::new();
    let requester = RequesterId::new("cli");
    let inbox = transport.register_requester(requester.clone());
    let relay: Arc<dyn RelayClient> = Arc::new(RelayHandle::spawn(Relay::from_config(transport.clone(), &config)?)?);
    let badge = Badge::new(requester, relay.clone(), inbox, Arc::new(SystemClock), config.handshake);

    let (result_tx, result_rx) = mpsc::channel();
    let launcher = |host: &RequesterId| -> comarkup::Result<()> {
        let frame_inbox = transport.register_frame("preview");
        let host = host.clone();
        let relay = relay.clone();
        let config = config.clone();
        let fetcher = fetcher.clone();
        let result_tx = result_tx.clone();
        std::thread::Builder::new()
            .name("comarkup-popup".to_string())
            .spawn(move || {
                let outcome = (|| -> comarkup::Result<_> {
                    let fetcher: Box<dyn ScriptFetcher> = if use_network {
                        Box::new(HttpFetcher::new(&config)?)
                    } else {
                        Box::new(fetcher)
                    };
                    let executor = SandboxExecutor::new(fetcher, &config)?;
                    let mut popup = Popup::new("preview".into(), host, relay, frame_inbox, executor);
                    popup.announce()?;
                    loop {
                        match popup.next_event()? {
                            PopupEvent::Rendered(result) => return Ok(Some(result)),
                            PopupEvent::Closed => return Ok(None),
                            _ => {}
                        }
                    }
                })();
                let _ = result_tx.send(outcome);
            })
            .map_err(|e| comarkup::Error::InitializationError(format!("popup thread: {}", e)))?;
        Ok(())
    };

    badge.open()?;
    comarkup::PopupLauncher::launch(&launcher, badge.requester())?;
    let attempts = badge.wait_ready()?;
    log::debug!("popup ready after {} attempts", attempts);
    badge.send_code(&code, framework, Some(code.clone()))?;

    match badge.wait_outcome()? {
        RenderStatus::Completed => {
            if let Ok(Ok(Some(Ok(outcome)))) = result_rx.recv() {
                for line in &outcome.console {
                    eprintln!("{}", line);
                }
                println!("{}", outcome.html);
            }
            Ok(())
        }
        RenderStatus::Failed(message) => {
            if let Ok(Ok(Some(Err(err)))) = result_rx.recv() {
                println!("{}", err.container_html);
                bail!("render failed during {}: {}", err.stage.as_str(), message);
            }
            bail!("render failed: {}", message)
        }
        RenderStatus::Closed => match result_rx.recv() {
            Ok(Err(e)) => Err(e.into()),
            _ => bail!("popup closed before rendering"),
        },
    }
}

#[cfg(not(feature = "sandbox"))]
fn preview(
    _input: &str,
    _framework: Option<FrameworkId>,
    _bundles: Vec<(String, PathBuf)>,
    _offline: bool,
) -> anyhow::Result<()> {
    bail!("comarkup was built without the `sandbox` feature")
}

fn serve(port: u16, host: String, output_dir: PathBuf, templates: Option<PathBuf>, keep: usize) -> anyhow::Result<()> {
    use std::sync::Arc;

    use comarkup::server::{RenderServer, Screenshotter, ServerConfig};

    let config = ServerConfig {
        bind: host,
        port,
        output_dir,
        templates_dir: templates,
        keep_screenshots: keep,
        ..Default::default()
    };

    #[cfg(feature = "cdp")]
    let screenshotter: Arc<dyn Screenshotter> = Arc::new(comarkup::cdp::CdpScreenshotter::new(&config)?);
    #[cfg(not(feature = "cdp"))]
    let screenshotter: Arc<dyn Screenshotter> = {
        log::warn!("built without the `cdp` feature; every render request will fail");
        Arc::new(comarkup::server::UnavailableScreenshotter)
    };

    let server = RenderServer::bind(config, screenshotter)?;
    println!("Available endpoints:");
    for framework in FrameworkId::ALL {
        println!("  POST /render/{:<8} - Render {} components", framework.as_str(), framework.profile().display_name);
    }
    server.run()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.quiet, cli.verbose);

    let res = match cli.command {
        Commands::Detect { input, json } => detect(&input, json),
        Commands::Scan { source, json } => scan(&source, json),
        Commands::Preview { input, framework, bundles, offline } => preview(&input, framework, bundles, offline),
        Commands::Serve { port, host, output_dir, templates, keep } => serve(port, host, output_dir, templates, keep),
    };

    if let Err(e) = res {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
