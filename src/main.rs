//! heapdb workload runner - concurrent transactions against one heap table

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use clap::Parser as ClapParser;
use heapdb::access::{HeapFile, Tuple};
use heapdb::config::{StorageConfig, DEFAULT_PAGE_SIZE, DEFAULT_POOL_PAGES};
use heapdb::database::Database;
use heapdb::storage::{PageStore, StorageResult};
use heapdb::transaction::Transaction;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Worker id, transaction number and row sequence lead every row.
const ROW_HEADER_LEN: usize = 16;
const MAX_RETRIES: usize = 32;
const TABLE_NAME: &str = "workload";

/// Runs concurrent insert/scan/delete transactions against a heap table
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./heapdb_data")]
    data_dir: PathBuf,

    /// Buffer pool capacity in pages
    #[arg(short, long, default_value_t = DEFAULT_POOL_PAGES)]
    pool_pages: usize,

    /// Page size in bytes
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Row width in bytes
    #[arg(short, long, default_value_t = 64)]
    row_width: usize,

    /// Concurrent worker threads
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Transactions per worker
    #[arg(short = 'n', long, default_value_t = 100)]
    transactions: usize,

    /// Rows inserted by each transaction
    #[arg(long, default_value_t = 8)]
    rows_per_txn: usize,

    /// Chance, in percent, that a transaction aborts instead of committing
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(0..=100))]
    abort_percent: u8,

    /// Seed for the workload generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Default)]
struct WorkerStats {
    committed: usize,
    aborted: usize,
    deadlock_retries: usize,
    rows_inserted: usize,
    rows_deleted: usize,
}

impl WorkerStats {
    fn merge(&mut self, other: WorkerStats) {
        self.committed += other.committed;
        self.aborted += other.aborted;
        self.deadlock_retries += other.deadlock_retries;
        self.rows_inserted += other.rows_inserted;
        self.rows_deleted += other.rows_deleted;
    }
}

enum Outcome {
    Committed { inserted: usize, deleted: usize },
    Aborted,
}

struct Worker<'a> {
    id: u32,
    args: &'a Args,
    db: &'a Database,
    table: Arc<HeapFile>,
    rng: StdRng,
}

impl Worker<'_> {
    fn run(mut self) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();

        for txn_no in 0..self.args.transactions {
            let mut attempts = 0;
            loop {
                match self.run_transaction(txn_no as u32) {
                    Ok(Outcome::Committed { inserted, deleted }) => {
                        stats.committed += 1;
                        stats.rows_inserted += inserted;
                        stats.rows_deleted += deleted;
                        break;
                    }
                    Ok(Outcome::Aborted) => {
                        stats.aborted += 1;
                        break;
                    }
                    Err(e) if e.is_deadlock() && attempts < MAX_RETRIES => {
                        attempts += 1;
                        stats.deadlock_retries += 1;
                        debug!("worker {} retrying after: {}", self.id, e);
                        let backoff = self.rng.gen_range(1..=5 * attempts as u64);
                        thread::sleep(Duration::from_millis(backoff));
                    }
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!("worker {} failed on transaction {}", self.id, txn_no)
                        })
                    }
                }
            }
        }

        Ok(stats)
    }

    fn run_transaction(&mut self, txn_no: u32) -> StorageResult<Outcome> {
        let txn = self.db.begin();
        match self.apply(&txn, txn_no) {
            Ok((inserted, deleted)) => {
                if self.rng.gen_bool(self.args.abort_percent as f64 / 100.0) {
                    txn.abort()?;
                    Ok(Outcome::Aborted)
                } else {
                    txn.commit()?;
                    Ok(Outcome::Committed { inserted, deleted })
                }
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    /// Inserts this transaction's rows, scans the table, and deletes one of the
    /// new rows now and then. Returns rows inserted and deleted.
    fn apply(&mut self, txn: &Transaction, txn_no: u32) -> StorageResult<(usize, usize)> {
        let table_id = self.table.table_id();
        let mut inserted = Vec::with_capacity(self.args.rows_per_txn);

        for seq in 0..self.args.rows_per_txn {
            let row = self.make_row(txn_no, seq as u64);
            let tuple_id = txn.insert(table_id, &row)?;
            inserted.push(Tuple::new(tuple_id, row));
        }

        let visible = txn.scan(&self.table)?.try_fold(0usize, |count, tuple| {
            tuple.map(|_| count + 1)
        })?;
        debug!("worker {} sees {} rows", self.id, visible);

        let mut deleted = 0;
        if !inserted.is_empty() && self.rng.gen_bool(0.25) {
            let victim = self.rng.gen_range(0..inserted.len());
            txn.delete(&inserted[victim])?;
            deleted += 1;
        }

        Ok((inserted.len(), deleted))
    }

    fn make_row(&mut self, txn_no: u32, seq: u64) -> Vec<u8> {
        let mut row = vec![0u8; self.args.row_width];
        LittleEndian::write_u32(&mut row[0..4], self.id);
        LittleEndian::write_u32(&mut row[4..8], txn_no);
        LittleEndian::write_u64(&mut row[8..16], seq);
        self.rng.fill(&mut row[ROW_HEADER_LEN..]);
        row
    }
}

fn count_rows(db: &Database, table: &Arc<HeapFile>) -> Result<usize> {
    let txn = db.begin();
    let mut count = 0;
    for tuple in txn.scan(table)? {
        let tuple = tuple?;
        let worker = LittleEndian::read_u32(&tuple.data[0..4]);
        debug!("row {:?} from worker {}", tuple.tuple_id, worker);
        count += 1;
    }
    txn.commit()?;
    Ok(count)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if args.row_width < ROW_HEADER_LEN {
        bail!("--row-width must be at least {} bytes", ROW_HEADER_LEN);
    }

    let config = StorageConfig::new(args.page_size, args.pool_pages);
    let db = Database::open(&args.data_dir, config).context("Failed to open database")?;

    let table = match db.open_table(TABLE_NAME, args.row_width) {
        Ok(table) => table,
        Err(_) => db
            .create_table(TABLE_NAME, args.row_width)
            .context("Failed to create workload table")?,
    };
    let initial_rows = count_rows(&db, &table)?;
    info!(
        "{} starts with {} rows, {} pages",
        TABLE_NAME,
        initial_rows,
        table.page_count()?
    );

    let started = Instant::now();
    let results = thread::scope(|scope| {
        let handles = (0..args.threads)
            .map(|id| {
                let worker = Worker {
                    id: id as u32,
                    args: &args,
                    db: &db,
                    table: Arc::clone(&table),
                    rng: StdRng::seed_from_u64(args.seed.wrapping_add(id as u64)),
                };
                scope.spawn(move || worker.run())
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(_) => bail!("worker thread panicked"),
            })
            .collect::<Vec<_>>()
    });

    let mut stats = WorkerStats::default();
    for result in results {
        stats.merge(result?);
    }
    let elapsed = started.elapsed();

    let final_rows = count_rows(&db, &table)?;
    let expected_rows = initial_rows + stats.rows_inserted - stats.rows_deleted;
    if final_rows != expected_rows {
        bail!(
            "Workload verification failed: table holds {} rows, committed work accounts for {}",
            final_rows,
            expected_rows
        );
    }

    println!("heapdb workload finished in {:.2?}", elapsed);
    println!("   - Data directory: {}", db.data_dir().display());
    println!("   - Committed: {}", stats.committed);
    println!("   - Aborted: {}", stats.aborted);
    println!("   - Deadlock retries: {}", stats.deadlock_retries);
    println!(
        "   - Rows: {} inserted, {} deleted, {} in table",
        stats.rows_inserted, stats.rows_deleted, final_rows
    );
    println!(
        "   - Buffer pool: {}/{} pages resident",
        db.buffer_pool().len(),
        db.buffer_pool().capacity()
    );

    Ok(())
}
