use anyhow::{Context, Result};
use clap::Parser;
use thermomote::{config::Port, logging, medium::RadioMedium};
use tokio::net::TcpListener;
use url::Url;

/// Radio channel bridge
///
/// Repeats every frame received from one client to all the others, so nodes
/// and gateways connected over tcp+raw share one channel.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address and port to listen on (host:port) for radio clients
    listen: String,

    /// URLs of additional ports to attach to the channel.
    ///
    /// either serial:///device/path or tcp+raw://host:port URLs supported
    #[arg(long)]
    attach: Vec<Url>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(args.verbose);

    let medium = RadioMedium::new();

    for url in args.attach {
        let id = match Port::open(&url).await? {
            Port::Serial(port) => medium.attach(port),
            Port::TcpRaw(stream) => medium.attach(stream),
        };

        tracing::info!("{url} attached as client {id}");
    }

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to listen on {}", args.listen))?;

    tracing::info!("listening on {}", args.listen);

    loop {
        let (socket, addr) = listener.accept().await?;

        socket.set_nodelay(true)?;

        let id = medium.attach(socket);

        tracing::info!("new connection from {addr} attached as client {id}");
    }
}
