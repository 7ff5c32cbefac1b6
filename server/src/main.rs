use clap::Parser;
use server::network::Server;

/// Parses command-line arguments and runs the chat broker until the
/// process is stopped.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "3000")]
        port: u16,
    }

    env_logger::init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let mut server = Server::new(&addr).await?;
    server.run().await?;

    Ok(())
}
