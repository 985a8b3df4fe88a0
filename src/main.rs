//! pagedb workload driver - runs concurrent insert/delete transactions
//! against one table and retries those chosen as deadlock victims.

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use log::{info, warn};
use pagedb::access::{DataType, Schema, Tuple, Value};
use pagedb::catalog::TableId;
use pagedb::database::{Database, DatabaseConfig};
use pagedb::storage::{StorageResult, DEFAULT_PAGE_SIZE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// pagedb - transactional page store workload driver
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./pagedb_data")]
    data_dir: PathBuf,

    /// Page size in bytes for new table files
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Buffer pool capacity in pages
    #[arg(short = 'p', long, default_value = "50")]
    pool_pages: usize,

    /// Number of concurrent worker threads
    #[arg(short, long, default_value = "4")]
    threads: usize,

    /// Transactions per thread
    #[arg(short = 'n', long, default_value = "100")]
    transactions: usize,

    /// Row operations per transaction
    #[arg(short, long, default_value = "5")]
    rows: usize,

    /// Share of operations that insert rather than delete
    #[arg(long, default_value = "0.7")]
    insert_ratio: f64,

    /// Random seed; each thread derives its own stream from it
    #[arg(long)]
    seed: Option<u64>,

    /// Skip syncing the log file on force
    #[arg(long)]
    no_sync: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Default)]
struct WorkerStats {
    committed: usize,
    deadlock_retries: usize,
    inserted: usize,
    deleted: usize,
}

impl WorkerStats {
    fn merge(&mut self, other: WorkerStats) {
        self.committed += other.committed;
        self.deadlock_retries += other.deadlock_retries;
        self.inserted += other.inserted;
        self.deleted += other.deleted;
    }
}

struct Workload<'a> {
    db: &'a Database,
    table_id: TableId,
    schema: Arc<Schema>,
    rows: usize,
    insert_ratio: f64,
    next_key: AtomicI64,
}

impl Workload<'_> {
    fn run_worker(&self, worker: usize, transactions: usize, seed: u64) -> Result<WorkerStats> {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(worker as u64));
        let mut stats = WorkerStats::default();

        for _ in 0..transactions {
            loop {
                match self.run_transaction(worker, &mut rng) {
                    Ok((inserted, deleted)) => {
                        stats.committed += 1;
                        stats.inserted += inserted;
                        stats.deleted += deleted;
                        break;
                    }
                    Err(e) if e.is_retryable() => {
                        stats.deadlock_retries += 1;
                        thread::sleep(Duration::from_millis(rng.gen_range(1..10)));
                    }
                    Err(e) => {
                        return Err(e).with_context(|| format!("worker {} failed", worker));
                    }
                }
            }
        }

        Ok(stats)
    }

    /// One transaction of random inserts and deletes. Any error aborts it.
    fn run_transaction(&self, worker: usize, rng: &mut StdRng) -> StorageResult<(usize, usize)> {
        let tx = self.db.begin();
        let mut inserted = 0;
        let mut deleted = 0;

        for _ in 0..self.rows {
            if rng.gen_bool(self.insert_ratio) {
                let key = self.next_key.fetch_add(1, Ordering::SeqCst);
                let mut tuple = Tuple::new(
                    Arc::clone(&self.schema),
                    vec![Value::Int64(key), Value::Int32(worker as i32)],
                )?;
                tx.insert_tuple(self.table_id, &mut tuple)?;
                inserted += 1;
            } else {
                let candidates = tx.scan(self.table_id)?.collect::<StorageResult<Vec<_>>>()?;
                if candidates.is_empty() {
                    continue;
                }
                let victim = &candidates[rng.gen_range(0..candidates.len())];
                tx.delete_tuple(victim)?;
                deleted += 1;
            }
        }

        match tx.commit() {
            Ok(()) => Ok((inserted, deleted)),
            Err(e) => {
                warn!("commit failed: {}", e);
                Err(e)
            }
        }
    }
}

fn count_rows(db: &Database, table_id: TableId) -> Result<usize> {
    let tx = db.begin();
    let mut count = 0;
    for tuple in tx.scan(table_id)? {
        tuple?;
        count += 1;
    }
    tx.commit()?;
    Ok(count)
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = DatabaseConfig {
        data_dir: args.data_dir.clone(),
        page_size: args.page_size,
        buffer_pool_pages: args.pool_pages,
        sync_log: !args.no_sync,
    };
    let db = Database::open(config).context("Failed to open database")?;

    let schema = Schema::new(vec![("key", DataType::Int64), ("worker", DataType::Int32)]);
    let table_id = db
        .create_table("workload", schema)
        .context("Failed to open workload table")?;
    let rows_before = count_rows(&db, table_id)?;

    let seed = args.seed.unwrap_or_else(rand::random);
    info!(
        "running {} threads x {} transactions x {} rows (seed {})",
        args.threads, args.transactions, args.rows, seed
    );

    let workload = Workload {
        db: &db,
        table_id,
        schema: db.schema(table_id)?,
        rows: args.rows,
        insert_ratio: args.insert_ratio.clamp(0.0, 1.0),
        next_key: AtomicI64::new(0),
    };

    let started = Instant::now();
    let mut total = WorkerStats::default();
    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..args.threads)
            .map(|worker| {
                let workload = &workload;
                scope.spawn(move || workload.run_worker(worker, args.transactions, seed))
            })
            .collect();

        for handle in handles {
            let stats = handle
                .join()
                .map_err(|_| anyhow::anyhow!("worker thread panicked"))??;
            total.merge(stats);
        }
        Ok(())
    })?;
    let elapsed = started.elapsed();

    db.flush_all()?;
    let rows_after = count_rows(&db, table_id)?;
    let expected = rows_before + total.inserted - total.deleted;

    println!("committed:        {}", total.committed);
    println!("deadlock retries: {}", total.deadlock_retries);
    println!("rows inserted:    {}", total.inserted);
    println!("rows deleted:     {}", total.deleted);
    println!("rows in table:    {} (expected {})", rows_after, expected);
    println!("elapsed:          {:.2?}", elapsed);

    if rows_after != expected {
        anyhow::bail!("row count mismatch: {} != {}", rows_after, expected);
    }
    info!("workload finished");
    Ok(())
}
