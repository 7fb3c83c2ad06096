#[tokio::main]
async fn main() {
    if let Err(e) = docuscan::run().await {
        eprintln!("docuscan: {e}");
        std::process::exit(1);
    }
}
