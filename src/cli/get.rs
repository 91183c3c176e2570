//! Raw GET command

use std::time::Duration;

use serde_json::Value;

use crate::cli::CommandContext;
use crate::cli::args::GlobalOptions;
use crate::client::RequestConfig;
use crate::error::Result;

/// Fetch `path` and print the response as pretty JSON
pub async fn run(opts: &GlobalOptions, path: &str, ttl_ms: Option<u64>) -> Result<()> {
    let ctx = CommandContext::new(opts)?;

    let mut config = RequestConfig::get();
    if let Some(ttl) = ttl_ms {
        config = config.cache_ttl(Duration::from_millis(ttl));
    }

    let value: Value = ctx.http.request(path, config).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
