use std::fmt;
use std::sync::Arc;

use flate2::Compression;
use serde::{Deserialize, Serialize};

use super::{Accumulator, BasicAccumulator, GzipAccumulator};
use crate::error::{CoreError, Result};
use crate::gzip::FRAMING_OVERHEAD;
use crate::limits::Limits;
use crate::mapper::RecordMapper;

/// zlib's default trade-off between speed and ratio.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Which accumulation strategy a factory produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Raw records, sized by their uncompressed length.
    #[default]
    Basic,
    /// Gzip members no larger than the record limit, sized by compressed length.
    SmartGzip,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Basic => write!(f, "basic"),
            StrategyKind::SmartGzip => write!(f, "smart_gzip"),
        }
    }
}

/// Produces a fresh, empty accumulator for every flush cycle.
///
/// The factory is validated once at construction; every accumulator it
/// creates shares the same limits and mapper. Workers hold the factory
/// behind an `Arc` and call [`AccumulatorFactory::create`] after each flush.
///
/// # Examples
///
/// ```
/// use qio_core::{AccumulatorFactory, Limits, StringMapper};
///
/// let factory = AccumulatorFactory::<String>::basic(Limits::new(1000, 100), StringMapper).unwrap();
/// let mut acc = factory.create();
/// assert!(acc.offer("hello".to_string()).is_accepted());
/// assert_eq!(acc.current_size(), 6);
/// ```
pub struct AccumulatorFactory<In> {
    strategy: StrategyKind,
    limits: Limits,
    mapper: Arc<dyn RecordMapper<In>>,
    level: Compression,
}

impl<In: Send + 'static> AccumulatorFactory<In> {
    /// Build a factory for `strategy`.
    ///
    /// # Arguments
    ///
    /// * `strategy` - basic or smart gzip accumulation
    /// * `limits` - record and batch limits, validated here
    /// * `mapper` - item to record encoder shared by every accumulator
    /// * `compression_level` - 0..=9, only used by the gzip strategy
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidLimits`] when the limits are inconsistent,
    /// the compression level is out of range, or (for gzip) the record limit
    /// leaves no room inside the gzip framing.
    pub fn new(
        strategy: StrategyKind,
        limits: Limits,
        mapper: Arc<dyn RecordMapper<In>>,
        compression_level: u32,
    ) -> Result<Self> {
        limits.validate()?;

        if compression_level > 9 {
            return Err(CoreError::InvalidLimits(format!(
                "compression level must be in 0..=9, got {}",
                compression_level
            )));
        }

        // A member holds the framing plus at least one record body.
        if strategy == StrategyKind::SmartGzip && limits.max_record_bytes <= FRAMING_OVERHEAD {
            return Err(CoreError::InvalidLimits(format!(
                "max_record_bytes ({}) must be larger than the gzip framing ({})",
                limits.max_record_bytes, FRAMING_OVERHEAD
            )));
        }

        Ok(Self {
            strategy,
            limits,
            mapper,
            level: Compression::new(compression_level),
        })
    }

    /// Basic strategy with the given mapper.
    pub fn basic(limits: Limits, mapper: impl RecordMapper<In> + 'static) -> Result<Self> {
        Self::new(StrategyKind::Basic, limits, Arc::new(mapper), DEFAULT_COMPRESSION_LEVEL)
    }

    /// Smart gzip strategy at the default compression level.
    pub fn smart_gzip(limits: Limits, mapper: impl RecordMapper<In> + 'static) -> Result<Self> {
        Self::new(
            StrategyKind::SmartGzip,
            limits,
            Arc::new(mapper),
            DEFAULT_COMPRESSION_LEVEL,
        )
    }

    /// A new, empty accumulator.
    pub fn create(&self) -> Box<dyn Accumulator<In>> {
        match self.strategy {
            StrategyKind::Basic => Box::new(BasicAccumulator::new(self.limits, self.mapper.clone())),
            StrategyKind::SmartGzip => Box::new(GzipAccumulator::new(
                self.limits,
                self.mapper.clone(),
                self.level,
            )),
        }
    }
}

impl<In> AccumulatorFactory<In> {
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn compression_level(&self) -> u32 {
        self.level.level()
    }
}

impl<In> fmt::Debug for AccumulatorFactory<In> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccumulatorFactory")
            .field("strategy", &self.strategy)
            .field("limits", &self.limits)
            .field("level", &self.level.level())
            .finish()
    }
}
