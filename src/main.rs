mod mode;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    mode::execute().await
}
