use crate::{query::Query, Error};
use drynx_encoding::{Dataset, Operation};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;

/// Resolves the records a data provider answers a survey with.
pub trait DataSource: Send + 'static {
    /// Returns one dataset per group of `query`, in the order of [Query::groups].
    fn load(&mut self, query: &Query) -> Result<Vec<Dataset>, Error>;
}

impl<S: DataSource + ?Sized> DataSource for Box<S> {
    fn load(&mut self, query: &Query) -> Result<Vec<Dataset>, Error> {
        (**self).load(query)
    }
}

/// Returns the dataset of `group` when present, else an empty dataset.
///
/// Without grouping, the only group is `[]`.
#[derive(Clone, Debug, Default)]
pub struct Fixed {
    groups: BTreeMap<String, Dataset>,
}

impl Fixed {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source answering every ungrouped survey with `dataset`.
    pub fn single(dataset: Dataset) -> Self {
        Self::new().with_group("[]", dataset)
    }

    pub fn with_group(mut self, group: &str, dataset: Dataset) -> Self {
        self.groups.insert(group.to_string(), dataset);
        self
    }
}

fn empty(operation: &Operation) -> Dataset {
    match operation {
        Operation::LogReg(_) => Dataset::Records(Vec::new()),
        _ => Dataset::empty(),
    }
}

impl DataSource for Fixed {
    fn load(&mut self, query: &Query) -> Result<Vec<Dataset>, Error> {
        Ok(query
            .groups()
            .iter()
            .map(|group| {
                self.groups
                    .get(group)
                    .cloned()
                    .unwrap_or_else(|| empty(&query.operation))
            })
            .collect())
    }
}

/// Draws `rows` random records per group, within the domain of the operation.
#[derive(Clone, Debug)]
pub struct Generated {
    rows: usize,
    min: i64,
    max: i64,
    rng: StdRng,
}

impl Generated {
    /// Values of operations without a domain are drawn from `[min, max]`.
    pub fn new(rows: usize, min: i64, max: i64, seed: u64) -> Self {
        Self {
            rows,
            min,
            max,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn column(&mut self, min: i64, max: i64) -> Vec<i64> {
        (0..self.rows)
            .map(|_| self.rng.gen_range(min..=max))
            .collect()
    }

    fn dataset(&mut self, operation: &Operation) -> Dataset {
        match operation {
            Operation::Sum | Operation::Mean | Operation::Variance => {
                Dataset::Columns(vec![self.column(self.min, self.max)])
            }
            Operation::Cosim => Dataset::Columns(vec![
                self.column(self.min, self.max),
                self.column(self.min, self.max),
            ]),
            Operation::BoolAnd | Operation::BoolOr => Dataset::Columns(vec![self.column(0, 1)]),
            Operation::FrequencyCount { min, max }
            | Operation::Min { min, max }
            | Operation::Max { min, max }
            | Operation::Union { min, max }
            | Operation::Inter { min, max } => Dataset::Columns(vec![self.column(*min, *max)]),
            Operation::LinReg { dimensions } => Dataset::Columns(
                (0..=*dimensions)
                    .map(|_| self.column(self.min, self.max))
                    .collect(),
            ),
            Operation::MlEval => Dataset::Columns(vec![self.column(0, 1), self.column(0, 1)]),
            Operation::LogReg(parameters) => Dataset::Records(
                (0..self.rows)
                    .map(|_| {
                        let mut record: Vec<f64> = (0..parameters.features)
                            .map(|_| self.rng.gen_range(-1.0..1.0))
                            .collect();
                        record.push(f64::from(self.rng.gen_range(0u8..=1)));
                        record
                    })
                    .collect(),
            ),
        }
    }
}

impl DataSource for Generated {
    fn load(&mut self, query: &Query) -> Result<Vec<Dataset>, Error> {
        if self.min > self.max {
            return Err(Error::Config(format!(
                "invalid generation bounds [{}, {}]",
                self.min, self.max
            )));
        }
        Ok((0..query.group_count())
            .map(|_| self.dataset(&query.operation))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::sample;

    #[test]
    fn test_fixed() {
        let mut query = sample(1, 0);
        let dataset = Dataset::Columns(vec![vec![1, 2]]);
        let mut source = Fixed::single(dataset.clone());
        assert_eq!(source.load(&query).unwrap(), vec![dataset.clone()]);

        query.group_by = vec![2];
        let mut source = Fixed::new().with_group("[1]", dataset.clone());
        assert_eq!(
            source.load(&query).unwrap(),
            vec![Dataset::empty(), dataset]
        );
    }

    #[test]
    fn test_generated() {
        let mut query = sample(1, 0);
        query.operation = Operation::FrequencyCount { min: 3, max: 5 };
        query.group_by = vec![3];
        let mut source = Generated::new(20, 0, 100, 7);
        let datasets = source.load(&query).unwrap();
        assert_eq!(datasets.len(), 3);
        for dataset in &datasets {
            let column = dataset.column(0).unwrap();
            assert_eq!(column.len(), 20);
            assert!(column.iter().all(|v| (3..=5).contains(v)));
        }

        let mut source = Generated::new(1, 5, 0, 7);
        assert!(source.load(&query).is_err());
    }
}
