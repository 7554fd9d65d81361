use chrono::NaiveDateTime;

use crate::model::*;

/// Place every block of `service` back-to-back starting at `start`.
///
/// Pauses consume timeline exactly like service blocks; consumers decide what
/// to do with each kind. The first interval starts at `start` and each next one
/// starts where the previous ended. `block_index` counts in `u32` directly, so
/// no index is ever narrowed from `usize`.
pub fn project(service: &Service, start: NaiveDateTime) -> Vec<ProjectedInterval> {
    let mut cursor = start;
    (0u32..)
        .zip(&service.blocks)
        .map(|(block_index, block)| {
            let span = Span::starting_at(cursor, block.duration_minutes);
            cursor = span.end;
            ProjectedInterval {
                span,
                kind: block.kind,
                block_index,
            }
        })
        .collect()
}
