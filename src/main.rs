pub mod etherscan;
pub mod fetcher;
pub mod helpers;
pub mod provider;
pub mod sink;

use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use reqwest::Url;
use serde_json::Value;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::Level;

use crate::etherscan::EtherscanClient;
use crate::fetcher::{ChunkSink, UnitSource};
use crate::provider::RpcSource;
use crate::sink::{DirStore, JsonChunkSink};

#[derive(Parser)]
struct Args {
    #[arg(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value = etherscan::DEFAULT_API_URL)]
    api_url: Url,

    #[arg(long, help = "Chain ID, required by the Etherscan v2 API")]
    chain_id: Option<u64>,

    #[arg(
        long,
        env = "ETH_RPC_URL",
        help = "Read blocks from this node instead of Etherscan"
    )]
    rpc_url: Option<Url>,

    #[arg(long, help = "Starting block number, inclusive")]
    start_block: u64,

    #[arg(long, help = "Ending block number, inclusive. Default to latest")]
    end_block: Option<u64>,

    #[arg(long, default_value = "./data")]
    output_dir: PathBuf,

    #[arg(long, default_value = "blk", help = "Output file name prefix")]
    prefix: String,

    #[arg(long, default_value = "5", help = "Number of blocks written to each file")]
    chunk_size: u64,

    #[arg(long, help = "Debug mode")]
    debug: bool,
}

/// Advances a progress bar for every chunk the inner sink accepts.
struct Progress<K> {
    inner: K,
    pb: ProgressBar,
}

impl<T, K: ChunkSink<T>> ChunkSink<T> for Progress<K> {
    type Error = K::Error;

    async fn emit(&mut self, chunk_start: u64, chunk_end: u64, items: Vec<T>) -> Result<(), K::Error> {
        self.inner.emit(chunk_start, chunk_end, items).await?;
        self.pb.inc(1);
        Ok(())
    }
}

/// Writes log lines with the progress bar cleared so the two don't overlap.
struct LogWriter<W> {
    pb: ProgressBar,
    out: W,
}

impl<W: Write> Write for LogWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let out = &mut self.out;
        self.pb.suspend(|| out.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // drawn only once downloading starts
    let pb = ProgressBar::hidden();
    let log_pb = pb.clone();

    let subs = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .with_writer(move || LogWriter {
            pb: log_pb.clone(),
            out: io::stdout(),
        })
        .finish();
    tracing::subscriber::set_global_default(subs)?;

    tracing::info!("Starting up");

    match &args.rpc_url {
        Some(url) => {
            let source = RpcSource::connect(url)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to RPC: {}", e))?;

            let end_block = match args.end_block {
                Some(b) => b,
                None => source
                    .block_number()
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to get latest block number: {}", e))?,
            };

            download(&source, end_block, &args, pb).await
        }
        None => {
            let source = EtherscanClient::new(args.api_url.clone(), args.api_key.clone(), args.chain_id);

            let end_block = match args.end_block {
                Some(b) => b,
                None => source
                    .block_number()
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to get latest block number: {}", e))?,
            };

            download(&source, end_block, &args, pb).await
        }
    }
}

async fn download<U>(source: &U, end_block: u64, args: &Args, pb: ProgressBar) -> anyhow::Result<()>
where
    U: UnitSource<Item = Value>,
{
    if args.start_block > end_block {
        anyhow::bail!("Start block is greater than end block");
    }

    if args.chunk_size == 0 {
        anyhow::bail!("Chunk size must be at least 1");
    }

    tracing::info!("Start block: {}", args.start_block);
    tracing::info!("End block: {}", end_block);
    tracing::info!("Chunk size: {}", args.chunk_size);

    let store = DirStore::create(&args.output_dir)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create output directory: {}", e))?;

    pb.set_style(
        ProgressStyle::default_bar()
            .template("{wide_bar} {pos}/{len} ETA:{eta} Elapsed:{elapsed}")?
            .progress_chars("#>-"),
    );
    pb.set_length(helpers::chunk_count(args.start_block, end_block, args.chunk_size));
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.tick();

    let mut sink = Progress {
        inner: JsonChunkSink::new(store, args.prefix.as_str()),
        pb,
    };

    tracing::info!("Downloading blocks");

    let res = fetcher::run(args.start_block, end_block, args.chunk_size, source, &mut sink).await;
    sink.pb.finish_and_clear();
    let stats = res?;

    tracing::info!("Total transactions: {}", stats.total_items);
    if stats.failed_units > 0 {
        tracing::warn!("Failed to fetch {} blocks", stats.failed_units);
    }
    tracing::info!("Total time taken: {:.2} seconds", stats.total_elapsed.as_secs_f64());
    tracing::info!("Average time per block: {:.2} seconds", stats.average_per_unit.as_secs_f64());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;

    #[derive(Default)]
    struct Counted(Vec<(u64, u64)>);

    impl ChunkSink<Value> for Counted {
        type Error = Infallible;

        async fn emit(&mut self, chunk_start: u64, chunk_end: u64, _items: Vec<Value>) -> Result<(), Infallible> {
            self.0.push((chunk_start, chunk_end));
            Ok(())
        }
    }

    #[test]
    fn log_lines_pass_through_the_bar() {
        let pb = ProgressBar::hidden();
        pb.set_length(3);
        pb.inc(1);

        let mut writer = LogWriter { pb: pb.clone(), out: Vec::new() };
        writer.write_all(b"Failed to fetch block, skipping\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(writer.out, b"Failed to fetch block, skipping\n".to_vec());
        assert_eq!(pb.position(), 1);
        assert!(!pb.is_finished());
    }

    #[tokio::test]
    async fn progress_advances_per_chunk() {
        let pb = ProgressBar::hidden();
        let mut sink = Progress {
            inner: Counted::default(),
            pb: pb.clone(),
        };

        sink.emit(100, 104, vec![]).await.unwrap();
        sink.emit(105, 109, vec![Value::Null]).await.unwrap();

        assert_eq!(pb.position(), 2);
        assert_eq!(sink.inner.0, vec![(100, 104), (105, 109)]);
    }
}
