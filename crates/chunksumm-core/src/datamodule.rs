//! # Data Module
//!
//! Owns the train/val/test splits, builds one [`SummDataset`] per split and
//! hands out restartable iterators of collated batches.
//!
//! Training data can be subsampled. Sampling follows the configured
//! granularity: in sentence mode individual records are drawn, in paper mode
//! whole papers are drawn so that no paper ever loses some of its sentences.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use candle_core::Device;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use crate::collate::{collate, Batch};
use crate::config::{DataConfig, PipelineConfig};
use crate::dataset::{group_papers, Granularity, SummDataset, TokenizedExample};
use crate::error::{ChunkSummError, Result};
use crate::record::Record;
use crate::tokenizer::TextTokenizer;

/// How much of the training split to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainSize {
    #[default]
    Full,
    /// Keep this many units (sentences or papers, per granularity).
    Count(usize),
}

/// One of the three splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        };
        f.write_str(name)
    }
}

fn rng_for(seed: u64, stream: u64) -> StdRng {
    StdRng::seed_from_u64(seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Draw `n` distinct indices from `0..population`, uniformly, returned in
/// ascending order.
pub fn sample_indices(population: usize, n: usize, seed: u64) -> Vec<usize> {
    if n >= population {
        return (0..population).collect();
    }

    let mut rng = rng_for(seed, 0);
    let mut picked = rand::seq::index::sample(&mut rng, population, n).into_vec();
    picked.sort_unstable();
    picked
}

/// Subsample records according to `size` and `granularity`. Kept records
/// retain their source order.
pub fn subsample(
    records: &[Record],
    size: TrainSize,
    granularity: Granularity,
    seed: u64,
) -> Vec<Record> {
    let n = match size {
        TrainSize::Full => return records.to_vec(),
        TrainSize::Count(n) => n,
    };

    match granularity {
        Granularity::Sentence => {
            if n > records.len() {
                tracing::warn!(
                    requested = n,
                    available = records.len(),
                    "train_size exceeds sentence count, keeping all"
                );
            }
            sample_indices(records.len(), n, seed)
                .into_iter()
                .map(|row| records[row].clone())
                .collect()
        }
        Granularity::Paper => {
            let papers = group_papers(records);
            if n > papers.len() {
                tracing::warn!(
                    requested = n,
                    available = papers.len(),
                    "train_size exceeds paper count, keeping all"
                );
            }
            let mut rows: Vec<usize> = sample_indices(papers.len(), n, seed)
                .into_iter()
                .flat_map(|p| papers[p].rows.iter().copied())
                .collect();
            rows.sort_unstable();
            rows.into_iter().map(|row| records[row].clone()).collect()
        }
    }
}

struct Splits {
    train: Arc<SummDataset>,
    val: Arc<SummDataset>,
    test: Arc<SummDataset>,
}

/// Train/val/test data wrapper producing batch iterators.
pub struct SummDataModule {
    train_records: Arc<Vec<Record>>,
    val_records: Arc<Vec<Record>>,
    test_records: Arc<Vec<Record>>,
    tokenizer: Arc<dyn TextTokenizer>,
    config: DataConfig,
    seed: u64,
    device: Device,
    splits: Option<Splits>,
    pool: Option<Arc<ThreadPool>>,
    epoch: AtomicU64,
}

impl SummDataModule {
    pub fn new(
        train: Vec<Record>,
        val: Vec<Record>,
        test: Vec<Record>,
        tokenizer: Arc<dyn TextTokenizer>,
        config: &PipelineConfig,
    ) -> Result<Self> {
        config.data.validate()?;

        Ok(Self {
            train_records: Arc::new(train),
            val_records: Arc::new(val),
            test_records: Arc::new(test),
            tokenizer,
            config: config.data.clone(),
            seed: config.seed,
            device: config.device()?,
            splits: None,
            pool: None,
            epoch: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    /// Build the three datasets (and the worker pool). Calling it again
    /// rebuilds them from the original records.
    pub fn setup(&mut self) -> Result<()> {
        let granularity = self.config.granularity;

        let train_records = match self.config.train_size {
            TrainSize::Full => Arc::clone(&self.train_records),
            size => Arc::new(subsample(&self.train_records, size, granularity, self.seed)),
        };

        let build = |records: Arc<Vec<Record>>| {
            Arc::new(SummDataset::new(
                records,
                Arc::clone(&self.tokenizer),
                granularity,
            ))
        };

        let splits = Splits {
            train: build(train_records),
            // Validation and test sizes are fixed regardless of train_size.
            val: build(Arc::clone(&self.val_records)),
            test: build(Arc::clone(&self.test_records)),
        };

        tracing::info!(
            granularity = ?granularity,
            train = splits.train.len(),
            val = splits.val.len(),
            test = splits.test.len(),
            "data module set up"
        );

        if self.config.workers > 0 && self.pool.is_none() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .thread_name(|i| format!("chunksumm-loader-{i}"))
                .build()
                .map_err(|e| ChunkSummError::InvalidConfig(format!("worker pool: {e}")))?;
            self.pool = Some(Arc::new(pool));
        }

        self.splits = Some(splits);
        Ok(())
    }

    fn splits(&self) -> Result<&Splits> {
        self.splits.as_ref().ok_or(ChunkSummError::NotSetUp)
    }

    /// The dataset behind `split`.
    pub fn dataset(&self, split: Split) -> Result<Arc<SummDataset>> {
        let splits = self.splits()?;
        let dataset = match split {
            Split::Train => &splits.train,
            Split::Val => &splits.val,
            Split::Test => &splits.test,
        };
        Ok(Arc::clone(dataset))
    }

    fn loader(&self, split: Split, order: Option<Vec<usize>>) -> Result<BatchLoader> {
        let dataset = self.dataset(split)?;
        let order = order.unwrap_or_else(|| (0..dataset.len()).collect());
        Ok(BatchLoader {
            dataset,
            order,
            batch_size: self.config.batch_size,
            cursor: 0,
            device: self.device.clone(),
            pool: self.pool.clone(),
        })
    }

    /// Batches of the training split. With `shuffle_train` every call draws a
    /// fresh permutation.
    pub fn train_dataloader(&self) -> Result<BatchLoader> {
        let order = if self.config.shuffle_train {
            let len = self.dataset(Split::Train)?.len();
            let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
            let mut rng = rng_for(self.seed, epoch + 1);
            let mut order: Vec<usize> = (0..len).collect();
            order.shuffle(&mut rng);
            Some(order)
        } else {
            None
        };
        self.loader(Split::Train, order)
    }

    pub fn val_dataloader(&self) -> Result<BatchLoader> {
        self.loader(Split::Val, None)
    }

    pub fn test_dataloader(&self) -> Result<BatchLoader> {
        self.loader(Split::Test, None)
    }

    /// Raw record count of the (possibly subsampled) training split.
    pub fn train_len(&self) -> Result<usize> {
        Ok(self.splits()?.train.records().len())
    }

    pub fn val_len(&self) -> Result<usize> {
        Ok(self.splits()?.val.records().len())
    }

    pub fn test_len(&self) -> Result<usize> {
        Ok(self.splits()?.test.records().len())
    }
}

/// Finite iterator of collated batches over one split.
pub struct BatchLoader {
    dataset: Arc<SummDataset>,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
    device: Device,
    pool: Option<Arc<ThreadPool>>,
}

impl BatchLoader {
    /// Total number of batches this loader yields from the start.
    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    fn build_examples(&self, indices: &[usize]) -> Result<Vec<TokenizedExample>> {
        match &self.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| self.dataset.get(i))
                    .collect::<Result<Vec<_>>>()
            }),
            None => indices.iter().map(|&i| self.dataset.get(i)).collect(),
        }
    }
}

impl Iterator for BatchLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = end;

        Some(
            self.build_examples(&indices)
                .and_then(|examples| collate(&examples, &self.device)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BatchLoader {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WhitespaceTokenizer;

    fn corpus() -> Vec<Record> {
        let mut records = Vec::new();
        for paper in 0..6 {
            for sentence in 0..(paper + 2) {
                let text = vec!["word"; sentence + 1].join(" ");
                records.push(Record::new(
                    format!("paper-{paper}"),
                    text,
                    sentence % 2 == 0,
                ));
            }
        }
        records
    }

    fn module(data: DataConfig) -> SummDataModule {
        let config = PipelineConfig::new().with_data(data);
        let records = corpus();
        SummDataModule::new(
            records.clone(),
            records[..5].to_vec(),
            records[5..9].to_vec(),
            Arc::new(WhitespaceTokenizer::default()),
            &config,
        )
        .unwrap()
    }

    #[test]
    fn test_loaders_require_setup() {
        let dm = module(DataConfig::new());
        assert!(matches!(dm.train_dataloader(), Err(ChunkSummError::NotSetUp)));
        assert!(matches!(dm.train_len(), Err(ChunkSummError::NotSetUp)));
    }

    #[test]
    fn test_full_split_lengths() {
        let mut dm = module(DataConfig::new().with_workers(0));
        dm.setup().unwrap();
        assert_eq!(dm.train_len().unwrap(), corpus().len());
        assert_eq!(dm.val_len().unwrap(), 5);
        assert_eq!(dm.test_len().unwrap(), 4);
    }

    #[test]
    fn test_sentence_batches_cover_split_in_order() {
        let mut dm = module(DataConfig::new().with_batch_size(4).with_workers(0));
        dm.setup().unwrap();

        let loader = dm.val_dataloader().unwrap();
        assert_eq!(loader.num_batches(), 2);
        let batches: Vec<Batch> = loader.collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].batch_size(), 4);
        assert_eq!(batches[1].batch_size(), 1);
    }

    #[test]
    fn test_loaders_are_restartable() {
        let mut dm = module(DataConfig::new().with_batch_size(3).with_workers(0));
        dm.setup().unwrap();

        let first: Vec<Vec<Vec<u32>>> = dm
            .test_dataloader()
            .unwrap()
            .map(|b| b.unwrap().input_ids.to_vec2().unwrap())
            .collect();
        let second: Vec<Vec<Vec<u32>>> = dm
            .test_dataloader()
            .unwrap()
            .map(|b| b.unwrap().input_ids.to_vec2().unwrap())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_worker_pool_matches_sequential() {
        let mut seq = module(DataConfig::new().with_batch_size(5).with_workers(0));
        let mut par = module(DataConfig::new().with_batch_size(5).with_workers(3));
        seq.setup().unwrap();
        par.setup().unwrap();

        let a: Vec<Vec<Vec<f32>>> = seq
            .train_dataloader()
            .unwrap()
            .map(|b| b.unwrap().targets.to_vec2().unwrap())
            .collect();
        let b: Vec<Vec<Vec<f32>>> = par
            .train_dataloader()
            .unwrap()
            .map(|b| b.unwrap().targets.to_vec2().unwrap())
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_paper_granularity_batches_papers() {
        let mut dm = module(
            DataConfig::new()
                .with_granularity(Granularity::Paper)
                .with_batch_size(8)
                .with_workers(0),
        );
        dm.setup().unwrap();

        let batches: Vec<Batch> = dm.train_dataloader().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].batch_size(), 6);
        // The last paper has 7 sentences of 1..=7 words.
        assert_eq!(batches[0].seq_len(), 28);
        // Raw record counts are reported, not paper counts.
        assert_eq!(dm.train_len().unwrap(), corpus().len());
    }

    #[test]
    fn test_sentence_subsampling() {
        let mut dm = module(
            DataConfig::new()
                .with_train_size(TrainSize::Count(10))
                .with_workers(0),
        );
        dm.setup().unwrap();
        assert_eq!(dm.train_len().unwrap(), 10);
        assert_eq!(dm.val_len().unwrap(), 5);
    }

    #[test]
    fn test_paper_subsampling_keeps_whole_papers() {
        let records = corpus();
        let kept = subsample(&records, TrainSize::Count(3), Granularity::Paper, 11);

        let groups = group_papers(&kept);
        assert_eq!(groups.len(), 3);
        for group in groups {
            let original = records.iter().filter(|r| r.paper_id == group.paper_id).count();
            assert_eq!(group.rows.len(), original);
        }
    }

    #[test]
    fn test_subsampling_preserves_source_order() {
        let records = corpus();
        let kept = subsample(&records, TrainSize::Count(12), Granularity::Sentence, 3);
        let positions: Vec<usize> = kept
            .iter()
            .map(|k| records.iter().position(|r| r == k).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_sample_indices() {
        let picked = sample_indices(100, 10, 5);
        assert_eq!(picked.len(), 10);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert!(picked.iter().all(|&i| i < 100));
        assert_eq!(picked, sample_indices(100, 10, 5));
        assert_eq!(sample_indices(3, 10, 5), vec![0, 1, 2]);
    }

    fn distinct_module(data: DataConfig) -> SummDataModule {
        let records: Vec<Record> = (0..24)
            .map(|i| Record::new(format!("paper-{}", i / 4), format!("token{i}"), i % 3 == 0))
            .collect();
        let config = PipelineConfig::new().with_data(data);
        SummDataModule::new(
            records.clone(),
            records[..4].to_vec(),
            records[4..8].to_vec(),
            Arc::new(WhitespaceTokenizer::default()),
            &config,
        )
        .unwrap()
    }

    /// Word ids of the train split in the order one loader yields them.
    fn epoch_order(dm: &SummDataModule) -> Vec<u32> {
        dm.train_dataloader()
            .unwrap()
            .flat_map(|b| b.unwrap().input_ids.to_vec2::<u32>().unwrap())
            .map(|row| row[1])
            .collect()
    }

    #[test]
    fn test_unshuffled_train_order_is_stable() {
        let mut dm = distinct_module(DataConfig::new().with_batch_size(5).with_workers(0));
        dm.setup().unwrap();
        let first = epoch_order(&dm);
        assert_eq!(first.len(), 24);
        assert_eq!(first, epoch_order(&dm));
    }

    #[test]
    fn test_shuffle_draws_a_new_permutation_each_epoch() {
        let mut fixed = distinct_module(DataConfig::new().with_batch_size(5).with_workers(0));
        fixed.setup().unwrap();
        let source = epoch_order(&fixed);

        let mut shuffled = distinct_module(
            DataConfig::new()
                .with_batch_size(5)
                .with_workers(0)
                .with_shuffle(true),
        );
        shuffled.setup().unwrap();
        let epoch0 = epoch_order(&shuffled);
        let epoch1 = epoch_order(&shuffled);

        assert_ne!(epoch0, source);
        assert_ne!(epoch1, epoch0);

        let sorted = |mut v: Vec<u32>| {
            v.sort_unstable();
            v
        };
        assert_eq!(sorted(epoch0.clone()), sorted(source.clone()));
        assert_eq!(sorted(epoch1), sorted(source));
    }

    #[test]
    fn test_shuffle_is_reproducible_for_a_seed() {
        let data = DataConfig::new()
            .with_batch_size(5)
            .with_workers(0)
            .with_shuffle(true);
        let mut a = distinct_module(data.clone());
        let mut b = distinct_module(data);
        a.setup().unwrap();
        b.setup().unwrap();
        assert_eq!(epoch_order(&a), epoch_order(&b));
    }
}
