//! Walkability filters applied to the heightfield after rasterization.
//!
//! The three passes are independent; the pipeline runs them in the order
//! low-hanging obstacles, ledges, low ceilings.

use walkway_common::{BuildContext, TimerCategory};

use crate::heightfield::{Heightfield, MAX_SPAN_HEIGHT, NULL_AREA};

const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

/// Re-marks unwalkable spans the agent can step over.
///
/// A span keeps the area of the walkable span directly below it when the
/// height difference between their tops is within the climb limit.
pub fn filter_low_hanging_walkable_obstacles(
    ctx: &mut BuildContext,
    hf: &mut Heightfield,
    walkable_climb: i32,
) {
    ctx.start_timer(TimerCategory::Filtering);

    for z in 0..hf.height {
        for x in 0..hf.width {
            let mut previous_walkable = false;
            let mut previous_area = NULL_AREA;
            let mut previous_smax = 0i32;

            let mut cur = hf.first_span(x, z);
            while let Some(idx) = cur {
                let span = hf.spans[idx as usize];
                let walkable = span.area != NULL_AREA;

                if !walkable
                    && previous_walkable
                    && (span.smax as i32 - previous_smax) <= walkable_climb
                {
                    hf.spans[idx as usize].area = previous_area;
                }

                // Track the original walkability so a run of unwalkable
                // spans is not promoted transitively.
                previous_walkable = walkable;
                previous_area = hf.spans[idx as usize].area;
                previous_smax = span.smax as i32;
                cur = span.next;
            }
        }
    }

    ctx.stop_timer(TimerCategory::Filtering);
}

/// Marks spans adjacent to ledges as unwalkable.
///
/// A span is a ledge when the drop to its lowest reachable neighbor exceeds
/// the climb limit, or when the accessible neighbor floors differ by more
/// than the climb limit (a steep slope crossing the cell).
pub fn filter_ledge_spans(
    ctx: &mut BuildContext,
    hf: &mut Heightfield,
    walkable_height: i32,
    walkable_climb: i32,
) {
    ctx.start_timer(TimerCategory::Filtering);

    for z in 0..hf.height {
        for x in 0..hf.width {
            let mut cur = hf.first_span(x, z);
            while let Some(idx) = cur {
                let span = hf.spans[idx as usize];
                cur = span.next;

                if span.area == NULL_AREA {
                    continue;
                }

                let floor = span.smax as i32;
                let ceiling = span
                    .next
                    .map(|n| hf.spans[n as usize].smin as i32)
                    .unwrap_or(MAX_SPAN_HEIGHT);

                let mut lowest_neighbor_delta = MAX_SPAN_HEIGHT;
                let mut lowest_traversable = floor;
                let mut highest_traversable = floor;

                for dir in 0..4 {
                    let nx = x + DIR_OFFSET_X[dir];
                    let nz = z + DIR_OFFSET_Z[dir];

                    if nx < 0 || nz < 0 || nx >= hf.width || nz >= hf.height {
                        lowest_neighbor_delta = -walkable_climb - 1;
                        break;
                    }

                    // Gap from this floor to the bottom of the neighbor
                    // column counts as a potential drop.
                    let first = hf.first_span(nx, nz);
                    let mut neighbor_ceiling = first
                        .map(|n| hf.spans[n as usize].smin as i32)
                        .unwrap_or(MAX_SPAN_HEIGHT);
                    if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                        lowest_neighbor_delta = -walkable_climb - 1;
                        break;
                    }

                    let mut ncur = first;
                    while let Some(nidx) = ncur {
                        let nspan = hf.spans[nidx as usize];
                        ncur = nspan.next;

                        let neighbor_floor = nspan.smax as i32;
                        neighbor_ceiling = nspan
                            .next
                            .map(|n| hf.spans[n as usize].smin as i32)
                            .unwrap_or(MAX_SPAN_HEIGHT);

                        // No room to traverse between the spans.
                        if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                            < walkable_height
                        {
                            continue;
                        }

                        let delta = neighbor_floor - floor;
                        lowest_neighbor_delta = lowest_neighbor_delta.min(delta);

                        if delta.abs() <= walkable_climb {
                            lowest_traversable = lowest_traversable.min(neighbor_floor);
                            highest_traversable = highest_traversable.max(neighbor_floor);
                        } else if delta < -walkable_climb {
                            break;
                        }
                    }
                    if lowest_neighbor_delta < -walkable_climb {
                        break;
                    }
                }

                if lowest_neighbor_delta < -walkable_climb
                    || (highest_traversable - lowest_traversable) > walkable_climb
                {
                    hf.spans[idx as usize].area = NULL_AREA;
                }
            }
        }
    }

    ctx.stop_timer(TimerCategory::Filtering);
}

/// Clears spans without enough clearance above them.
pub fn filter_walkable_low_height_spans(
    ctx: &mut BuildContext,
    hf: &mut Heightfield,
    walkable_height: i32,
) {
    ctx.start_timer(TimerCategory::Filtering);

    for z in 0..hf.height {
        for x in 0..hf.width {
            let mut cur = hf.first_span(x, z);
            while let Some(idx) = cur {
                let span = hf.spans[idx as usize];
                let floor = span.smax as i32;
                let ceiling = span
                    .next
                    .map(|n| hf.spans[n as usize].smin as i32)
                    .unwrap_or(MAX_SPAN_HEIGHT);
                if ceiling - floor < walkable_height {
                    hf.spans[idx as usize].area = NULL_AREA;
                }
                cur = span.next;
            }
        }
    }

    ctx.stop_timer(TimerCategory::Filtering);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::WALKABLE_AREA;
    use glam::Vec3;

    fn field(w: i32, h: i32) -> Heightfield {
        Heightfield::new(
            w,
            h,
            Vec3::ZERO,
            Vec3::new(w as f32, 50.0, h as f32),
            1.0,
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn test_low_hanging_obstacle_promoted() {
        let mut hf = field(3, 3);
        let mut ctx = BuildContext::new();
        hf.add_span(1, 1, 0, 5, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 6, 7, NULL_AREA, 1).unwrap();
        filter_low_hanging_walkable_obstacles(&mut ctx, &mut hf, 3);
        let spans: Vec<_> = hf.column_spans(1, 1).map(|(_, s)| s.area).collect();
        assert_eq!(spans, vec![WALKABLE_AREA, WALKABLE_AREA]);
    }

    #[test]
    fn test_low_hanging_not_promoted_past_climb() {
        let mut hf = field(3, 3);
        let mut ctx = BuildContext::new();
        hf.add_span(1, 1, 0, 5, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 10, 15, NULL_AREA, 1).unwrap();
        filter_low_hanging_walkable_obstacles(&mut ctx, &mut hf, 3);
        let spans: Vec<_> = hf.column_spans(1, 1).map(|(_, s)| s.area).collect();
        assert_eq!(spans, vec![WALKABLE_AREA, NULL_AREA]);
    }

    #[test]
    fn test_border_spans_become_ledges() {
        let mut hf = field(3, 3);
        let mut ctx = BuildContext::new();
        for z in 0..3 {
            for x in 0..3 {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        filter_ledge_spans(&mut ctx, &mut hf, 2, 1);
        // Cells touching the grid edge drop off the world and become
        // ledges; the center cell keeps its area.
        for z in 0..3 {
            for x in 0..3 {
                let (_, s) = hf.column_spans(x, z).next().unwrap();
                if x == 1 && z == 1 {
                    assert_eq!(s.area, WALKABLE_AREA);
                } else {
                    assert_eq!(s.area, NULL_AREA, "({x},{z}) should be a ledge");
                }
            }
        }
    }

    #[test]
    fn test_interior_span_survives_ledge_filter() {
        let mut hf = field(5, 5);
        let mut ctx = BuildContext::new();
        for z in 0..5 {
            for x in 0..5 {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        filter_ledge_spans(&mut ctx, &mut hf, 2, 1);
        let (_, s) = hf.column_spans(2, 2).next().unwrap();
        assert_eq!(s.area, WALKABLE_AREA);
    }

    #[test]
    fn test_low_ceiling_cleared() {
        let mut hf = field(3, 3);
        let mut ctx = BuildContext::new();
        hf.add_span(0, 0, 0, 2, WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 4, 8, WALKABLE_AREA, 1).unwrap();
        filter_walkable_low_height_spans(&mut ctx, &mut hf, 5);
        let spans: Vec<_> = hf.column_spans(0, 0).map(|(_, s)| s.area).collect();
        // Clearance between the spans is 2 < 5; the top span is open above.
        assert_eq!(spans, vec![NULL_AREA, WALKABLE_AREA]);
    }
}
