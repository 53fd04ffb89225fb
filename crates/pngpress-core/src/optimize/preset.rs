//! Search breadth per effort level.

use crate::codec::{DeflateParams, DeflateStrategy, FilterStrategy, RowFilter};
use crate::config::MAX_LEVEL;

/// What the optimizer tries at one effort level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchPlan {
    pub filters: &'static [FilterStrategy],
    pub deflate: &'static [DeflateParams],
    /// Also search the truecolor variant when palette conversion applied.
    pub keep_truecolor: bool,
}

const NONE: FilterStrategy = FilterStrategy::Fixed(RowFilter::None);
const SUB: FilterStrategy = FilterStrategy::Fixed(RowFilter::Sub);
const UP: FilterStrategy = FilterStrategy::Fixed(RowFilter::Up);
const AVERAGE: FilterStrategy = FilterStrategy::Fixed(RowFilter::Average);
const PAETH: FilterStrategy = FilterStrategy::Fixed(RowFilter::Paeth);

const FILTERS_0: &[FilterStrategy] = &[NONE];
const FILTERS_1: &[FilterStrategy] = &[NONE, FilterStrategy::MinSum];
const FILTERS_2: &[FilterStrategy] = &[NONE, SUB, UP, FilterStrategy::MinSum];
const FILTERS_3: &[FilterStrategy] = &[NONE, SUB, UP, AVERAGE, PAETH, FilterStrategy::MinSum];
const FILTERS_5: &[FilterStrategy] = &[
    NONE,
    SUB,
    UP,
    AVERAGE,
    PAETH,
    FilterStrategy::MinSum,
    FilterStrategy::Entropy,
];

const DEFLATE_0: &[DeflateParams] = &[DeflateParams::new(6, DeflateStrategy::Default)];
const DEFLATE_2: &[DeflateParams] = &[DeflateParams::new(8, DeflateStrategy::Default)];
const DEFLATE_3: &[DeflateParams] = &[DeflateParams::new(9, DeflateStrategy::Default)];
const DEFLATE_4: &[DeflateParams] = &[
    DeflateParams::new(9, DeflateStrategy::Default),
    DeflateParams::new(9, DeflateStrategy::Filtered),
];
const DEFLATE_5: &[DeflateParams] = &[
    DeflateParams::new(10, DeflateStrategy::Default),
    DeflateParams::new(10, DeflateStrategy::Filtered),
];
const DEFLATE_6: &[DeflateParams] = &[
    DeflateParams::new(10, DeflateStrategy::Default),
    DeflateParams::new(10, DeflateStrategy::Filtered),
    DeflateParams::new(10, DeflateStrategy::Rle),
];

/// The plan for `level`; values above the maximum use the maximum.
pub fn plan(level: u8) -> SearchPlan {
    let (filters, deflate) = match level.min(MAX_LEVEL) {
        0 => (FILTERS_0, DEFLATE_0),
        1 => (FILTERS_1, DEFLATE_0),
        2 => (FILTERS_2, DEFLATE_2),
        3 => (FILTERS_3, DEFLATE_3),
        4 => (FILTERS_3, DEFLATE_4),
        5 => (FILTERS_5, DEFLATE_5),
        _ => (FILTERS_5, DEFLATE_6),
    };
    SearchPlan {
        filters,
        deflate,
        keep_truecolor: level >= 4,
    }
}
