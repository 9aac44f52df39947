// LePilote CLI Binary
//
// Entry point for the lepilote command-line tool.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lepilote::cli::main().await
}
