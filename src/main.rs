use anyhow::{anyhow, Context, Result};
use sigmf_blocks::engine::{Flowgraph, FlowgraphConfig};
use sigmf_blocks::observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: sigmf-copy <config.json>"))?;
    let text = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read {config_path}"))?;
    let config = FlowgraphConfig::from_json(serde_json::from_str(&text)?)?;

    println!("SigMF copy");
    println!("==========\n");
    println!("source: {}", config.source.filename);
    println!("sink:   {}", config.sink.filename);

    let (graph, sink) = Flowgraph::from_config(&config)?;
    let stats = graph.run().await?;

    println!("\nitems read:    {}", stats.items_read);
    println!("items written: {}", stats.items_written);
    println!("tags:          {}", stats.tags);
    if let Some((data, meta)) = sink.last_finalized() {
        println!("wrote {} + {}", data.display(), meta.display());
    }
    Ok(())
}
