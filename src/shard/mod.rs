//! Shard functions (C1): map a shard-key value, or a predicate range
//! over it, to a set of sub-table indices.

use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;

use crate::error::RouterError;

/// A shard-key value as extracted from a literal in a predicate or a
/// `VALUES` row.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Integer(i64),
    String(String),
}

impl KeyValue {
    /// Integers hash to their `u64` bit pattern (sign-extended for
    /// negative values); strings hash via FNV-1a. Pinned here since no
    /// wire-compatibility target constrains the choice (see `DESIGN.md`).
    fn hash_u64(&self) -> u64 {
        match self {
            KeyValue::Integer(v) => *v as u64,
            KeyValue::String(s) => {
                let mut hasher = FnvHasher::default();
                hasher.write(s.as_bytes());
                hasher.finish()
            }
        }
    }

    fn as_integer(&self) -> Result<i64, RouterError> {
        match self {
            KeyValue::Integer(v) => Ok(*v),
            KeyValue::String(_) => Err(RouterError::KeyTypeMismatch),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Integer(v) => write!(f, "{v}"),
            KeyValue::String(s) => write!(f, "{s}"),
        }
    }
}

/// Capability set a shard function supports: place a single key, and
/// widen a range/inequality predicate to the sub-tables it can touch.
pub trait Shard: fmt::Debug + Send + Sync {
    /// Number of sub-tables this function is sized for.
    fn total(&self) -> usize;

    fn find_for_key(&self, value: &KeyValue) -> Result<usize, RouterError>;

    /// `lo`/`hi` are inclusive bounds; `None` means unbounded on that side.
    fn find_for_range(
        &self,
        lo: Option<&KeyValue>,
        hi: Option<&KeyValue>,
    ) -> Result<Vec<usize>, RouterError>;
}

/// Single sub-table; used for non-sharded (default) rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultShard;

impl Shard for DefaultShard {
    fn total(&self) -> usize {
        1
    }

    fn find_for_key(&self, _value: &KeyValue) -> Result<usize, RouterError> {
        Ok(0)
    }

    fn find_for_range(
        &self,
        _lo: Option<&KeyValue>,
        _hi: Option<&KeyValue>,
    ) -> Result<Vec<usize>, RouterError> {
        Ok(vec![0])
    }
}

/// `findForKey(v) = hash(v) mod shardNum`. Cannot narrow a range
/// predicate: every range/inequality widens to every sub-table.
#[derive(Debug, Clone)]
pub struct HashShard {
    shard_num: usize,
}

impl HashShard {
    pub fn new(shard_num: usize) -> Self {
        Self {
            shard_num: shard_num.max(1),
        }
    }
}

impl Shard for HashShard {
    fn total(&self) -> usize {
        self.shard_num
    }

    fn find_for_key(&self, value: &KeyValue) -> Result<usize, RouterError> {
        Ok((value.hash_u64() % self.shard_num as u64) as usize)
    }

    fn find_for_range(
        &self,
        _lo: Option<&KeyValue>,
        _hi: Option<&KeyValue>,
    ) -> Result<Vec<usize>, RouterError> {
        Ok((0..self.shard_num).collect())
    }
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    lo: i64,
    hi: i64,
}

/// An ordered list of half-open `[lo, hi)` row intervals, one per
/// sub-table, covering `[0, total * table_row_limit)`.
#[derive(Debug, Clone)]
pub struct RangeShard {
    intervals: Vec<Interval>,
}

impl RangeShard {
    /// One interval per sub-table, each `table_row_limit` rows wide,
    /// laid out consecutively starting at 0: `interval[i] = [i *
    /// table_row_limit, (i + 1) * table_row_limit)`. `total` is
    /// `sum(locations)`, i.e. `Rule::total()` — not `locations.len()`,
    /// which only counts nodes.
    pub fn new(total: usize, table_row_limit: i64) -> Self {
        let mut intervals = Vec::with_capacity(total);
        for i in 0..total {
            let lo = i as i64 * table_row_limit;
            intervals.push(Interval {
                lo,
                hi: lo + table_row_limit,
            });
        }
        Self { intervals }
    }

    fn span(&self) -> i64 {
        self.intervals.last().map(|i| i.hi).unwrap_or(0)
    }
}

impl Shard for RangeShard {
    fn total(&self) -> usize {
        self.intervals.len()
    }

    fn find_for_key(&self, value: &KeyValue) -> Result<usize, RouterError> {
        let v = value.as_integer()?;
        if v < 0 || v >= self.span() {
            return Err(RouterError::KeyOutOfRange(v, self.span()));
        }
        self.intervals
            .binary_search_by(|iv| {
                if v < iv.lo {
                    std::cmp::Ordering::Greater
                } else if v >= iv.hi {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .map_err(|_| RouterError::KeyOutOfRange(v, self.span()))
    }

    fn find_for_range(
        &self,
        lo: Option<&KeyValue>,
        hi: Option<&KeyValue>,
    ) -> Result<Vec<usize>, RouterError> {
        let lo_v = lo.map(KeyValue::as_integer).transpose()?.unwrap_or(i64::MIN);
        let hi_v = hi.map(KeyValue::as_integer).transpose()?.unwrap_or(i64::MAX);
        if lo_v > hi_v {
            return Ok(vec![]);
        }
        Ok(self
            .intervals
            .iter()
            .enumerate()
            .filter(|(_, iv)| iv.lo <= hi_v && lo_v < iv.hi)
            .map(|(idx, _)| idx)
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_shard_always_zero() {
        let shard = DefaultShard;
        assert_eq!(shard.find_for_key(&KeyValue::Integer(42)).unwrap(), 0);
        assert_eq!(
            shard.find_for_range(None, None).unwrap(),
            vec![0]
        );
    }

    #[test]
    fn hash_shard_modulo() {
        let shard = HashShard::new(4);
        assert_eq!(shard.find_for_key(&KeyValue::Integer(7)).unwrap(), 3);
        assert_eq!(shard.find_for_key(&KeyValue::Integer(5)).unwrap(), 1);
        assert_eq!(shard.find_for_key(&KeyValue::Integer(6)).unwrap(), 2);
    }

    #[test]
    fn hash_shard_widens_range() {
        let shard = HashShard::new(4);
        let all = shard
            .find_for_range(Some(&KeyValue::Integer(1)), None)
            .unwrap();
        assert_eq!(all, vec![0, 1, 2, 3]);
    }

    #[test]
    fn range_shard_finds_interval() {
        // locations=[2, 2] => total = sum(locations) = 4 sub-tables.
        let shard = RangeShard::new(4, 1000);
        assert_eq!(shard.find_for_key(&KeyValue::Integer(0)).unwrap(), 0);
        assert_eq!(shard.find_for_key(&KeyValue::Integer(1999)).unwrap(), 1);
        assert_eq!(shard.find_for_key(&KeyValue::Integer(2000)).unwrap(), 2);
        assert_eq!(shard.find_for_key(&KeyValue::Integer(3999)).unwrap(), 3);
        assert!(shard.find_for_key(&KeyValue::Integer(4000)).is_err());
        assert!(shard.find_for_key(&KeyValue::Integer(-1)).is_err());
    }

    #[test]
    fn range_shard_total_is_sum_of_locations_not_node_count() {
        // A range rule with `locations=[2, 2]` places 4 sub-tables
        // across 2 nodes; the shard function's index space must cover
        // all 4 sub-tables, not the 2 `locations` entries.
        let shard = RangeShard::new(4, 1000);
        assert_eq!(shard.total(), 4);
        for (value, expected_index) in [(500, 0), (1500, 1), (2500, 2), (3500, 3)] {
            assert_eq!(
                shard.find_for_key(&KeyValue::Integer(value)).unwrap(),
                expected_index
            );
        }
    }

    #[test]
    fn range_shard_range_query_intersects() {
        let shard = RangeShard::new(4, 1000);
        let hit = shard
            .find_for_range(Some(&KeyValue::Integer(1500)), Some(&KeyValue::Integer(2500)))
            .unwrap();
        assert_eq!(hit, vec![1, 2]);
    }

    #[test]
    fn range_shard_rejects_string_key() {
        let shard = RangeShard::new(2, 1000);
        assert_eq!(
            shard.find_for_key(&KeyValue::String("x".into())),
            Err(RouterError::KeyTypeMismatch)
        );
    }
}
