use std::{collections::BTreeMap, fs::File, io, path::Path};

use burn::data::dataset::{self, InMemDataset};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{Error, Result};

use super::Sample;

/// An in-memory split of the orientation dataset
pub struct Dataset {
    /// Underlying In-Memory dataset
    dataset: InMemDataset<Sample>,
}

impl dataset::Dataset<Sample> for Dataset {
    fn get(&self, index: usize) -> Option<Sample> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl Dataset {
    /// Wraps already-loaded samples
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            dataset: InMemDataset::new(samples),
        }
    }

    /// Loads the labelled file at `path` and splits it into `(train, validation)`.
    ///
    /// The file needs a header row followed by `label,text` rows. Rows with the wrong
    /// number of fields or a non-integer label are skipped with a warning. The split is
    /// stratified on the label, so both halves keep the class proportions of the source.
    pub fn load(
        path: impl AsRef<Path>,
        validation_fraction: f64,
        shuffle: bool,
        seed: u64,
    ) -> Result<(Self, Self)> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::DataFormat(format!("unable to open {}: {}", path.display(), e))
        })?;

        let samples = read_samples(file)?;
        info!("Loaded {} labelled samples from {}", samples.len(), path.display());

        let (train, validation) = stratified_split(samples, validation_fraction, shuffle, seed)?;

        Ok((Self::new(train), Self::new(validation)))
    }
}

/// Read labelled samples from CSV with a header row and `label,text` columns
pub fn read_samples<R: io::Read>(reader: R) -> Result<Vec<Sample>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let columns = reader.headers()?.len();
    if columns < 2 {
        return Err(Error::DataFormat(format!(
            "expected a header with label and text columns, found {} column(s)",
            columns
        )));
    }

    let mut samples = Vec::new();

    for (index, record) in reader.records().enumerate() {
        // Line numbers are 1-based and skip the header
        let line = index + 2;

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping unreadable row at line {}: {}", line, e);
                continue;
            }
        };

        if record.len() != columns {
            warn!(
                "Skipping row at line {}: expected {} fields, found {}",
                line,
                columns,
                record.len()
            );
            continue;
        }

        let label = match record[0].trim().parse::<usize>() {
            Ok(label) => label,
            Err(_) => {
                warn!("Skipping row at line {}: invalid label {:?}", line, &record[0]);
                continue;
            }
        };

        samples.push(Sample::new(record[1].to_string(), Some(label)));
    }

    Ok(samples)
}

/// Split labelled samples into `(train, validation)` while preserving label proportions.
///
/// The validation size is `ceil(validation_fraction * n)`. Each label receives the floor of
/// its proportional share, and leftover rows go to the labels with the largest fractional
/// remainder (larger classes first on ties, then lower label ids). Without shuffling, both
/// halves keep source order and each class contributes its trailing rows to validation.
pub fn stratified_split(
    samples: Vec<Sample>,
    validation_fraction: f64,
    shuffle: bool,
    seed: u64,
) -> Result<(Vec<Sample>, Vec<Sample>)> {
    if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return Err(Error::InvalidConfig(format!(
            "validation fraction must be in (0, 1), got {}",
            validation_fraction
        )));
    }

    let total = samples.len();
    let mut classes: BTreeMap<usize, Vec<(usize, Sample)>> = BTreeMap::new();

    for (index, sample) in samples.into_iter().enumerate() {
        let label = sample.label.ok_or_else(|| {
            Error::DataFormat(format!("sample {} has no label and cannot be stratified", index))
        })?;

        classes.entry(label).or_default().push((index, sample));
    }

    if let Some((label, members)) = classes.iter().find(|(_, members)| members.len() < 2) {
        return Err(Error::DataFormat(format!(
            "label {} has only {} member(s); a stratified split needs at least two per label",
            label,
            members.len()
        )));
    }

    // Tolerance keeps products like 0.2 * 100 from rounding up an extra row
    let n_validation = (validation_fraction * total as f64 - 1e-9).ceil() as usize;
    if n_validation == 0 || n_validation >= total {
        return Err(Error::DataFormat(format!(
            "cannot split {} samples with validation fraction {}",
            total, validation_fraction
        )));
    }

    let counts: Vec<(usize, usize)> = classes
        .iter()
        .map(|(label, members)| (*label, members.len()))
        .collect();
    let allocation = allocate(&counts, total, n_validation);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(total - n_validation);
    let mut validation = Vec::with_capacity(n_validation);

    for (label, mut members) in classes {
        if shuffle {
            members.shuffle(&mut rng);
        }

        let take = allocation.get(&label).copied().unwrap_or(0);
        let held_out = members.split_off(members.len() - take);

        train.extend(members);
        validation.extend(held_out);
    }

    if shuffle {
        train.shuffle(&mut rng);
        validation.shuffle(&mut rng);
    } else {
        train.sort_by_key(|(index, _)| *index);
        validation.sort_by_key(|(index, _)| *index);
    }

    debug!(
        "Stratified split: {} train, {} validation across {} labels",
        train.len(),
        validation.len(),
        counts.len()
    );

    Ok((
        train.into_iter().map(|(_, sample)| sample).collect(),
        validation.into_iter().map(|(_, sample)| sample).collect(),
    ))
}

/// Distribute `draws` rows across classes proportionally to their counts
fn allocate(counts: &[(usize, usize)], total: usize, draws: usize) -> BTreeMap<usize, usize> {
    let mut shares: Vec<(usize, usize, usize, f64)> = counts
        .iter()
        .map(|&(label, count)| {
            let exact = count as f64 * draws as f64 / total as f64;
            let floor = exact.floor();

            (label, count, floor as usize, exact - floor)
        })
        .collect();

    let assigned: usize = shares.iter().map(|(_, _, floor, _)| floor).sum();
    let mut remainder = draws.saturating_sub(assigned);

    shares.sort_by(|a, b| {
        b.3.partial_cmp(&a.3)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.1.cmp(&a.1))
            .then(a.0.cmp(&b.0))
    });

    let mut allocation = BTreeMap::new();
    for (label, count, floor, _) in shares {
        let mut take = floor;
        if remainder > 0 && take < count {
            take += 1;
            remainder -= 1;
        }
        allocation.insert(label, take);
    }

    allocation
}
