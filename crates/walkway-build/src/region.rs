//! Region partitioning over the compact heightfield.
//!
//! Three interchangeable strategies: watershed (distance-field flood from
//! the farthest cells inward), monotone (single sweep) and layered
//! (monotone regions grouped into non-overlapping height layers for the
//! tile cache). All of them leave region ids in `CompactSpan::reg`; spans
//! inside the border band get ids flagged with [`BORDER_REGION`].

use walkway_common::{BuildContext, Error, Result, TimerCategory};

use crate::compact::{
    BORDER_REGION, CompactHeightfield, DIR_OFFSET_X, DIR_OFFSET_Z,
};
use crate::config::{BuildConfig, PartitionKind};
use crate::heightfield::NULL_AREA;

/// Builds regions with the strategy selected in the configuration.
pub fn build_regions(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    cfg: &BuildConfig,
) -> Result<()> {
    match cfg.partition {
        PartitionKind::Watershed => build_regions_watershed(
            ctx,
            chf,
            cfg.border_size,
            cfg.min_region_area,
            cfg.merge_region_area,
        ),
        PartitionKind::Monotone => build_regions_monotone(
            ctx,
            chf,
            cfg.border_size,
            cfg.min_region_area,
            cfg.merge_region_area,
        ),
        PartitionKind::Layered => build_layer_regions(ctx, chf, cfg.border_size, cfg.min_region_area),
    }
}

/// Builds the distance-to-boundary field used by the watershed strategy.
pub fn build_distance_field(ctx: &mut BuildContext, chf: &mut CompactHeightfield) {
    ctx.start_timer(TimerCategory::Regions);

    let mut dist = vec![0xffffu16; chf.span_count];

    // Boundary seeds: spans at an area change or with a missing neighbor.
    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cells[(x + z * chf.width) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                let span = chf.spans[i];
                let area = chf.areas[i];
                let mut nc = 0;
                for dir in 0..4 {
                    if let Some(n) = chf.neighbor_span(x, z, &span, dir) {
                        if chf.areas[n] == area {
                            nc += 1;
                        }
                    }
                }
                if nc != 4 {
                    dist[i] = 0;
                }
            }
        }
    }

    // Two-pass chamfer transform.
    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cells[(x + z * chf.width) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                let span = chf.spans[i];
                chamfer_relax(chf, &mut dist, x, z, i, &span, 0, 3);
                chamfer_relax(chf, &mut dist, x, z, i, &span, 3, 2);
            }
        }
    }
    for z in (0..chf.height).rev() {
        for x in (0..chf.width).rev() {
            let cell = chf.cells[(x + z * chf.width) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                let span = chf.spans[i];
                chamfer_relax(chf, &mut dist, x, z, i, &span, 2, 1);
                chamfer_relax(chf, &mut dist, x, z, i, &span, 1, 0);
            }
        }
    }

    let max_distance = dist.iter().copied().max().unwrap_or(0);
    chf.max_distance = max_distance;
    chf.dist = box_blur(chf, 1, &dist);

    ctx.stop_timer(TimerCategory::Regions);
}

fn chamfer_relax(
    chf: &CompactHeightfield,
    dist: &mut [u16],
    x: i32,
    z: i32,
    i: usize,
    span: &crate::compact::CompactSpan,
    dir: usize,
    diag_dir: usize,
) {
    if let Some(n) = chf.neighbor_span(x, z, span, dir) {
        if dist[n] + 2 < dist[i] {
            dist[i] = dist[n] + 2;
        }
        let nx = x + DIR_OFFSET_X[dir];
        let nz = z + DIR_OFFSET_Z[dir];
        let nspan = chf.spans[n];
        if let Some(nn) = chf.neighbor_span(nx, nz, &nspan, diag_dir) {
            if dist[nn] + 3 < dist[i] {
                dist[i] = dist[nn] + 3;
            }
        }
    }
}

fn box_blur(chf: &CompactHeightfield, threshold: u16, src: &[u16]) -> Vec<u16> {
    let threshold = threshold * 2;
    let mut dst = vec![0u16; chf.span_count];

    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cells[(x + z * chf.width) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                let span = chf.spans[i];
                let cd = src[i];
                if cd <= threshold {
                    dst[i] = cd;
                    continue;
                }

                let mut d = cd as i32;
                for dir in 0..4 {
                    match chf.neighbor_span(x, z, &span, dir) {
                        Some(n) => {
                            d += src[n] as i32;
                            let nx = x + DIR_OFFSET_X[dir];
                            let nz = z + DIR_OFFSET_Z[dir];
                            let nspan = chf.spans[n];
                            let diag = (dir + 1) & 0x3;
                            match chf.neighbor_span(nx, nz, &nspan, diag) {
                                Some(nn) => d += src[nn] as i32,
                                None => d += cd as i32,
                            }
                        }
                        None => d += (cd * 2) as i32,
                    }
                }
                dst[i] = ((d + 5) / 9) as u16;
            }
        }
    }
    dst
}

fn paint_rect_region(
    chf: &mut CompactHeightfield,
    src_reg: &mut [u16],
    min_x: i32,
    max_x: i32,
    min_z: i32,
    max_z: i32,
    reg_id: u16,
) {
    for z in min_z..max_z {
        for x in min_x..max_x {
            let cell = chf.cells[(x + z * chf.width) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                if chf.areas[i] != NULL_AREA {
                    src_reg[i] = reg_id;
                }
            }
        }
    }
}

/// Watershed partitioning: flood regions from the farthest cells inward.
pub fn build_regions_watershed(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    if chf.dist.is_empty() {
        build_distance_field(ctx, chf);
    }
    ctx.start_timer(TimerCategory::Regions);

    let mut src_reg = vec![0u16; chf.span_count];
    let mut src_dist = vec![0u16; chf.span_count];
    let mut region_id: u16 = 1;

    if border_size > 0 {
        let w = chf.width;
        let h = chf.height;
        let bw = border_size.min(w);
        let bh = border_size.min(h);
        paint_rect_region(chf, &mut src_reg, 0, bw, 0, h, region_id | BORDER_REGION);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, w - bw, w, 0, h, region_id | BORDER_REGION);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, 0, w, 0, bh, region_id | BORDER_REGION);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, 0, w, h - bh, h, region_id | BORDER_REGION);
        region_id += 1;
    }
    chf.border_size = border_size;

    let mut level = (chf.max_distance + 1) & !1u16;
    while level > 0 {
        level = level.saturating_sub(2);

        expand_regions(chf, 8, level, &mut src_reg, &mut src_dist);

        // Seed new regions at the current water level.
        for z in 0..chf.height {
            for x in 0..chf.width {
                let cell = chf.cells[(x + z * chf.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    if chf.dist[i] < level || src_reg[i] != 0 || chf.areas[i] == NULL_AREA {
                        continue;
                    }
                    if flood_region(chf, x, z, i, level, region_id, &mut src_reg, &mut src_dist) {
                        if region_id == 0xffff {
                            ctx.stop_timer(TimerCategory::Regions);
                            ctx.log_error("regions", "region id overflow");
                            return Err(Error::BuildFailed("region id overflow".to_string()));
                        }
                        region_id += 1;
                    }
                }
            }
        }
    }

    expand_regions(chf, 64, 0, &mut src_reg, &mut src_dist);

    merge_and_filter_regions(
        ctx,
        chf,
        min_region_area,
        merge_region_area,
        &mut src_reg,
        &mut region_id,
    )?;

    for (i, &r) in src_reg.iter().enumerate() {
        chf.spans[i].reg = r;
    }
    chf.max_regions = region_id;

    ctx.stop_timer(TimerCategory::Regions);
    ctx.log_info("regions", format!("{} watershed regions", region_id));
    Ok(())
}

fn flood_region(
    chf: &CompactHeightfield,
    x: i32,
    z: i32,
    i: usize,
    level: u16,
    reg_id: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
) -> bool {
    let area = chf.areas[i];
    let lev = level.saturating_sub(2);
    let mut stack = vec![(x, z, i)];
    src_reg[i] = reg_id;
    src_dist[i] = 0;
    let mut count = 0usize;

    while let Some((cx, cz, ci)) = stack.pop() {
        let span = chf.spans[ci];

        // A neighboring region next to this span means the seed belongs to
        // that region's watershed; back out of the cell.
        let mut adjacent = 0u16;
        for dir in 0..4 {
            if let Some(n) = chf.neighbor_span(cx, cz, &span, dir) {
                if chf.areas[n] != area {
                    continue;
                }
                let nr = src_reg[n];
                if nr & BORDER_REGION != 0 {
                    continue;
                }
                if nr != 0 && nr != reg_id {
                    adjacent = nr;
                    break;
                }
                let nx = cx + DIR_OFFSET_X[dir];
                let nz = cz + DIR_OFFSET_Z[dir];
                let nspan = chf.spans[n];
                let diag = (dir + 1) & 0x3;
                if let Some(nn) = chf.neighbor_span(nx, nz, &nspan, diag) {
                    if chf.areas[nn] == area {
                        let nnr = src_reg[nn];
                        if nnr != 0 && nnr != reg_id && nnr & BORDER_REGION == 0 {
                            adjacent = nnr;
                            break;
                        }
                    }
                }
            }
        }
        if adjacent != 0 {
            src_reg[ci] = 0;
            continue;
        }
        count += 1;

        for dir in 0..4 {
            if let Some(n) = chf.neighbor_span(cx, cz, &span, dir) {
                if chf.areas[n] == area && chf.dist[n] >= lev && src_reg[n] == 0 {
                    src_reg[n] = reg_id;
                    src_dist[n] = 0;
                    stack.push((cx + DIR_OFFSET_X[dir], cz + DIR_OFFSET_Z[dir], n));
                }
            }
        }
    }

    count > 0
}

fn expand_regions(
    chf: &CompactHeightfield,
    max_iter: usize,
    level: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
) {
    // Collect unassigned spans at or above the water level.
    let mut stack: Vec<(i32, i32, usize)> = Vec::new();
    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cells[(x + z * chf.width) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                if chf.dist[i] >= level && src_reg[i] == 0 && chf.areas[i] != NULL_AREA {
                    stack.push((x, z, i));
                }
            }
        }
    }

    let mut iter = 0usize;
    while !stack.is_empty() {
        let mut failed = 0usize;
        let mut dirty: Vec<(usize, u16, u16)> = Vec::new();

        for &(x, z, i) in &stack {
            if src_reg[i] != 0 {
                failed += 1;
                continue;
            }
            let span = chf.spans[i];
            let area = chf.areas[i];
            let mut r = 0u16;
            let mut d2 = u16::MAX;
            for dir in 0..4 {
                if let Some(n) = chf.neighbor_span(x, z, &span, dir) {
                    if chf.areas[n] != area {
                        continue;
                    }
                    if src_reg[n] > 0 && src_reg[n] & BORDER_REGION == 0 && src_dist[n] + 2 < d2 {
                        r = src_reg[n];
                        d2 = src_dist[n] + 2;
                    }
                }
            }
            if r > 0 {
                dirty.push((i, r, d2));
            } else {
                failed += 1;
            }
        }

        for &(i, r, d) in &dirty {
            src_reg[i] = r;
            src_dist[i] = d;
        }
        stack.retain(|&(_, _, i)| src_reg[i] == 0);

        if failed == stack.len() && dirty.is_empty() {
            break;
        }
        if level > 0 {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

struct RegionInfo {
    span_count: i32,
    id: u16,
    area: u8,
    remap: bool,
    visited: bool,
    connections: Vec<u16>,
}

fn merge_and_filter_regions(
    ctx: &mut BuildContext,
    chf: &CompactHeightfield,
    min_region_area: i32,
    merge_region_area: i32,
    src_reg: &mut [u16],
    max_region_id: &mut u16,
) -> Result<()> {
    let nreg = (*max_region_id as usize) + 1;
    let mut regions: Vec<RegionInfo> = (0..nreg)
        .map(|id| RegionInfo {
            span_count: 0,
            id: id as u16,
            area: 0,
            remap: false,
            visited: false,
            connections: Vec::new(),
        })
        .collect();

    // Gather sizes and adjacency.
    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cells[(x + z * chf.width) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                let r = src_reg[i];
                if r == 0 || (r as usize) >= nreg {
                    continue;
                }
                let reg = &mut regions[r as usize];
                reg.span_count += 1;
                reg.area = chf.areas[i];

                let span = chf.spans[i];
                for dir in 0..4 {
                    let nr = match chf.neighbor_span(x, z, &span, dir) {
                        Some(n) => src_reg[n],
                        None => 0,
                    };
                    // Border-flagged neighbors are recorded too; the
                    // component walk below treats them as a border contact.
                    if nr != r && nr != 0 && (nr & BORDER_REGION != 0 || (nr as usize) < nreg) {
                        if !regions[r as usize].connections.contains(&nr) {
                            regions[r as usize].connections.push(nr);
                        }
                    }
                }
            }
        }
    }

    // Remove connected clumps of regions whose combined size is below the
    // minimum area, unless they touch a border region.
    for start in 1..nreg {
        if regions[start].span_count == 0
            || regions[start].visited
            || regions[start].id & BORDER_REGION != 0
        {
            continue;
        }
        let mut component = vec![start as u16];
        let mut trace = vec![start as u16];
        regions[start].visited = true;
        let mut total = 0i32;
        let mut connects_to_border = false;

        while let Some(r) = trace.pop() {
            total += regions[r as usize].span_count;
            let conns = regions[r as usize].connections.clone();
            for c in conns {
                if c & BORDER_REGION != 0 {
                    connects_to_border = true;
                    continue;
                }
                if !regions[c as usize].visited {
                    regions[c as usize].visited = true;
                    component.push(c);
                    trace.push(c);
                }
            }
        }

        if total < min_region_area && !connects_to_border {
            for r in component {
                regions[r as usize].span_count = 0;
                regions[r as usize].id = 0;
            }
        }
    }

    // Merge undersized regions into their smallest-id neighbor.
    let mut merged = true;
    while merged {
        merged = false;
        for r in 1..nreg {
            if regions[r].id == 0 || regions[r].id & BORDER_REGION != 0 {
                continue;
            }
            if regions[r].span_count == 0 || regions[r].span_count >= merge_region_area {
                continue;
            }
            let target = regions[r]
                .connections
                .iter()
                .copied()
                .filter(|&c| {
                    c & BORDER_REGION == 0
                        && regions[c as usize].id != 0
                        && regions[c as usize].area == regions[r].area
                        && resolve_region(&regions, c) != resolve_region(&regions, r as u16)
                })
                .min_by_key(|&c| regions[c as usize].span_count);
            if let Some(t) = target {
                let t_root = resolve_region(&regions, t) as usize;
                regions[t_root].span_count += regions[r].span_count;
                regions[r].span_count = 0;
                regions[r].id = regions[t_root].id;
                regions[r].remap = true;
                merged = true;
            }
        }
    }

    // Compress region ids into a contiguous range.
    let mut new_id = 0u16;
    let mut id_map = vec![0u16; nreg];
    let mut mapped = vec![false; nreg];
    for r in 1..nreg {
        let resolved = resolve_region(&regions, r as u16);
        if resolved == 0 || resolved & BORDER_REGION != 0 {
            id_map[r] = resolved;
            continue;
        }
        if !mapped[resolved as usize] {
            new_id += 1;
            mapped[resolved as usize] = true;
            id_map[resolved as usize] = new_id;
        }
        id_map[r] = id_map[resolved as usize];
    }

    for reg in src_reg.iter_mut() {
        let r = *reg;
        if r == 0 {
            continue;
        }
        if r & BORDER_REGION != 0 {
            continue;
        }
        *reg = id_map[r as usize];
    }

    *max_region_id = new_id;
    ctx.log_info(
        "regions",
        format!("merged and filtered down to {new_id} regions"),
    );
    Ok(())
}

fn resolve_region(regions: &[RegionInfo], mut r: u16) -> u16 {
    // Follow merge redirects to the surviving region id.
    let mut guard = 0;
    while regions[r as usize].remap && guard < regions.len() {
        let next = regions[r as usize].id;
        if next == r {
            break;
        }
        r = next;
        guard += 1;
    }
    regions[r as usize].id
}

/// Sweep-span bookkeeping for the monotone partitioner.
#[derive(Clone, Copy, Default)]
struct SweepSpan {
    /// Row-local sweep id.
    rid: u16,
    /// Final region id.
    id: u16,
    /// Samples seen from the previous row.
    ns: i32,
    /// Candidate region in the previous row, 0 when inconsistent.
    nei: u16,
}

/// Monotone partitioning: one sweep along z, merging row runs.
pub fn build_regions_monotone(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    ctx.start_timer(TimerCategory::Regions);

    let mut src_reg = vec![0u16; chf.span_count];
    let mut region_id: u16 = 1;

    if border_size > 0 {
        let w = chf.width;
        let h = chf.height;
        let bw = border_size.min(w);
        let bh = border_size.min(h);
        paint_rect_region(chf, &mut src_reg, 0, bw, 0, h, region_id | BORDER_REGION);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, w - bw, w, 0, h, region_id | BORDER_REGION);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, 0, w, 0, bh, region_id | BORDER_REGION);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, 0, w, h - bh, h, region_id | BORDER_REGION);
        region_id += 1;
    }
    chf.border_size = border_size;

    let mut prev = vec![0i32; region_id as usize + 1];
    let mut sweeps: Vec<SweepSpan> = Vec::new();

    for z in border_size..chf.height - border_size {
        prev.iter_mut().for_each(|p| *p = 0);
        prev.resize(region_id as usize + 1, 0);
        sweeps.clear();
        let mut rid: u16 = 1;

        for x in border_size..chf.width - border_size {
            let cell = chf.cells[(x + z * chf.width) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                if chf.areas[i] == NULL_AREA {
                    continue;
                }
                let span = chf.spans[i];

                // Continue the run from the -x neighbor when possible.
                let mut sweep_id = 0xffffu16;
                if let Some(n) = chf.neighbor_span(x, z, &span, 0) {
                    if chf.areas[n] == chf.areas[i] && src_reg[n] != 0 && src_reg[n] & BORDER_REGION == 0
                    {
                        sweep_id = src_reg[n];
                    }
                }
                if sweep_id == 0xffff {
                    sweep_id = rid;
                    rid += 1;
                    sweeps.push(SweepSpan::default());
                    sweeps[(sweep_id - 1) as usize].rid = sweep_id;
                    sweeps[(sweep_id - 1) as usize].ns = 0;
                    sweeps[(sweep_id - 1) as usize].nei = 0;
                }

                // Sample the -z neighbor's region.
                if let Some(n) = chf.neighbor_span(x, z, &span, 3) {
                    let nr = src_reg[n];
                    if nr != 0
                        && nr & BORDER_REGION == 0
                        && chf.areas[n] == chf.areas[i]
                        && prev[nr as usize] >= 0
                    {
                        let sw = &mut sweeps[(sweep_id - 1) as usize];
                        if sw.nei == 0 || sw.nei == nr {
                            sw.nei = nr;
                            sw.ns += 1;
                            prev[nr as usize] += 1;
                        } else {
                            sw.nei = 0xffff;
                        }
                    }
                }

                src_reg[i] = sweep_id;
            }
        }

        // Resolve the row's sweeps into region ids.
        for sw in sweeps.iter_mut() {
            if sw.nei != 0 && sw.nei != 0xffff && prev[sw.nei as usize] == sw.ns {
                sw.id = sw.nei;
            } else {
                if region_id == 0xffff {
                    ctx.stop_timer(TimerCategory::Regions);
                    return Err(Error::BuildFailed("region id overflow".to_string()));
                }
                sw.id = region_id;
                region_id += 1;
                prev.resize(region_id as usize + 1, 0);
            }
        }
        for x in border_size..chf.width - border_size {
            let cell = chf.cells[(x + z * chf.width) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                let r = src_reg[i];
                if r > 0 && r != 0xffff && r & BORDER_REGION == 0 && (r as usize) <= sweeps.len() {
                    src_reg[i] = sweeps[(r - 1) as usize].id;
                }
            }
        }
    }

    merge_and_filter_regions(
        ctx,
        chf,
        min_region_area,
        merge_region_area,
        &mut src_reg,
        &mut region_id,
    )?;

    for (i, &r) in src_reg.iter().enumerate() {
        chf.spans[i].reg = r;
    }
    chf.max_regions = region_id;

    ctx.stop_timer(TimerCategory::Regions);
    ctx.log_info("regions", format!("{} monotone regions", region_id));
    Ok(())
}

/// Layered partitioning for the tile cache: monotone regions constrained so
/// that no region contains two spans of the same column, which keeps every
/// region extractable as a flat 2D layer.
pub fn build_layer_regions(
    ctx: &mut BuildContext,
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
) -> Result<()> {
    // Monotone sweeps never merge spans within one column, so the sweep
    // output already satisfies the layer constraint; a merge area of zero
    // keeps layers intact.
    build_regions_monotone(ctx, chf, border_size, min_region_area, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::{Heightfield, WALKABLE_AREA};
    use glam::Vec3;

    fn flat_chf(size: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 20.0, size as f32),
            1.0,
            1.0,
        )
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut ctx = BuildContext::new();
        CompactHeightfield::build(&mut ctx, &hf, 2, 1).unwrap()
    }

    #[test]
    fn test_distance_field_peaks_in_center() {
        let mut chf = flat_chf(9);
        let mut ctx = BuildContext::new();
        build_distance_field(&mut ctx, &mut chf);
        let center = chf.cells[(4 + 4 * 9) as usize].index as usize;
        let corner = chf.cells[0].index as usize;
        assert!(chf.dist[center] > chf.dist[corner]);
        assert_eq!(chf.dist[corner], 0);
    }

    #[test]
    fn test_watershed_single_region_on_flat_field() {
        let mut chf = flat_chf(8);
        let mut ctx = BuildContext::new();
        build_regions_watershed(&mut ctx, &mut chf, 0, 4, 10).unwrap();
        let regs: std::collections::HashSet<u16> = chf
            .spans
            .iter()
            .map(|s| s.reg)
            .filter(|&r| r != 0)
            .collect();
        assert_eq!(regs.len(), 1);
        // Every walkable span belongs to the region.
        assert!(chf.spans.iter().all(|s| s.reg != 0));
    }

    #[test]
    fn test_watershed_separates_islands() {
        // Two 4x4 islands with a gap between them.
        let mut hf = Heightfield::new(
            9,
            4,
            Vec3::ZERO,
            Vec3::new(9.0, 20.0, 4.0),
            1.0,
            1.0,
        )
        .unwrap();
        for z in 0..4 {
            for x in 0..4 {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
                hf.add_span(x + 5, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut ctx = BuildContext::new();
        let mut chf = CompactHeightfield::build(&mut ctx, &hf, 2, 1).unwrap();
        build_regions_watershed(&mut ctx, &mut chf, 0, 2, 6).unwrap();

        let left = chf.cells[0].index as usize;
        let right = chf.cells[5].index as usize;
        assert_ne!(chf.spans[left].reg, 0);
        assert_ne!(chf.spans[right].reg, 0);
        assert_ne!(chf.spans[left].reg, chf.spans[right].reg);
    }

    #[test]
    fn test_monotone_covers_field() {
        let mut chf = flat_chf(8);
        let mut ctx = BuildContext::new();
        build_regions_monotone(&mut ctx, &mut chf, 0, 4, 10).unwrap();
        assert!(chf.spans.iter().all(|s| s.reg != 0));
    }

    #[test]
    fn test_min_region_area_discards_specks() {
        // A lone 1x1 island next to a large plate.
        let mut hf = Heightfield::new(
            10,
            6,
            Vec3::ZERO,
            Vec3::new(10.0, 20.0, 6.0),
            1.0,
            1.0,
        )
        .unwrap();
        for z in 0..6 {
            for x in 0..6 {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        hf.add_span(9, 5, 0, 1, WALKABLE_AREA, 1).unwrap();
        let mut ctx = BuildContext::new();
        let mut chf = CompactHeightfield::build(&mut ctx, &hf, 2, 1).unwrap();
        build_regions_watershed(&mut ctx, &mut chf, 0, 4, 10).unwrap();

        // The single-cell island is below the minimum area and must be
        // discarded.
        let lone = chf.cells[(9 + 5 * 10) as usize].index as usize;
        assert_eq!(chf.spans[lone].reg, 0);
    }
}
