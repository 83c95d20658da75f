//! Greedy single-lookback merging of adjacent draws.
//!
//! A merged draw must render exactly what the two separate draws would.
//! That holds when both share every piece of pipeline state and the second
//! draw's geometry is simply appended: same destination, program, uniforms,
//! blend, sampling, regions and projection. Even-odd draws are never merged
//! because their stencil pass would see the combined geometry.

use smallvec::SmallVec;

use super::cmd::{DrawTriangles, Sources, SOURCE_SLOTS};

fn same_state(a: &DrawTriangles, b: &DrawTriangles) -> bool {
    a.destination == b.destination
        && a.shader == b.shader
        && a.composite == b.composite
        && a.filter == b.filter
        && a.address == b.address
        && a.dst_region == b.dst_region
        && a.clip_region == b.clip_region
        && a.color_matrix == b.color_matrix
        && a.uniforms == b.uniforms
        && a.invert_y == b.invert_y
}

/// Source list of the merged draw plus, for each of `next`'s slots, the
/// slot it moves to.
fn union_sources(
    last: &Sources,
    next: &Sources,
) -> Option<(Sources, SmallVec<[u32; SOURCE_SLOTS]>)> {
    let mut merged = last.clone();
    let mut remap = SmallVec::new();
    for &id in next {
        let slot = match merged.iter().position(|&s| s == id) {
            Some(i) => i,
            None => {
                if merged.len() == SOURCE_SLOTS {
                    return None;
                }
                merged.push(id);
                merged.len() - 1
            }
        };
        remap.push(slot as u32);
    }
    Some((merged, remap))
}

/// Appends `next` to `last` if the result is draw-for-draw equivalent.
/// Gives `next` back untouched otherwise.
pub(crate) fn try_merge(
    last: &mut DrawTriangles,
    next: DrawTriangles,
    max_vertices: usize,
) -> Result<(), DrawTriangles> {
    if last.even_odd || next.even_odd || !same_state(last, &next) {
        return Err(next);
    }
    // Built-in draws without sources would pick up the other draw's slot 0.
    if next.shader.is_none() && (last.sources.is_empty() || next.sources.is_empty()) {
        return Err(next);
    }
    let total = last.vertices.len() + next.vertices.len();
    if total > max_vertices || total > u16::MAX as usize + 1 {
        return Err(next);
    }

    let remap = if next.shader.is_none() {
        let Some((sources, remap)) = union_sources(&last.sources, &next.sources) else {
            return Err(next);
        };
        last.sources = sources;
        Some(remap)
    } else if last.sources == next.sources {
        // Custom shaders may read slots directly; keep them in place.
        None
    } else {
        return Err(next);
    };

    let base = last.vertices.len() as u16;
    last.indices.extend(next.indices.iter().map(|&i| i + base));
    last.vertices.extend(next.vertices.into_iter().map(|mut v| {
        if let Some(slot) = remap.as_ref().and_then(|r| r.get(v.source as usize)) {
            v.source = *slot;
        }
        v
    }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;
    use crate::coords::{quad, Region, QUAD_INDICES};
    use crate::image::ImageId;
    use crate::paint::CompositeMode;

    fn ids(n: usize) -> Vec<ImageId> {
        let mut map: SlotMap<ImageId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn draw(dst: ImageId, sources: &[ImageId], x: f32) -> DrawTriangles {
        DrawTriangles::new(
            dst,
            sources.iter().copied(),
            quad([x, 0.0, 1.0, 1.0], [0.0, 0.0, 1.0, 1.0]),
            QUAD_INDICES,
        )
    }

    // ── accepted ──────────────────────────────────────────────────────────

    #[test]
    fn same_state_merges_with_index_offset() {
        let id = ids(2);
        let mut a = draw(id[0], &[id[1]], 0.0);
        try_merge(&mut a, draw(id[0], &[id[1]], 2.0), 65536).unwrap();
        assert_eq!(a.vertices.len(), 8);
        assert_eq!(&a.indices[6..], &[4, 5, 6, 5, 6, 7]);
        assert_eq!(a.sources.len(), 1);
    }

    #[test]
    fn sources_union_and_remap() {
        let id = ids(4);
        let mut a = draw(id[0], &[id[1], id[2]], 0.0);
        let mut b = draw(id[0], &[id[3], id[2]], 2.0);
        for v in &mut b.vertices {
            v.source = 1; // id[2]
        }
        try_merge(&mut a, b, 65536).unwrap();
        assert_eq!(a.sources.as_slice(), &[id[1], id[2], id[3]]);
        assert!(a.vertices[4..].iter().all(|v| v.source == 1));
    }

    // ── refused ───────────────────────────────────────────────────────────

    #[test]
    fn different_destination_is_refused() {
        let id = ids(3);
        let mut a = draw(id[0], &[id[2]], 0.0);
        let b = draw(id[1], &[id[2]], 0.0);
        assert_eq!(try_merge(&mut a, b.clone(), 65536), Err(b));
        assert_eq!(a.vertices.len(), 4);
    }

    #[test]
    fn differing_state_is_refused() {
        let id = ids(2);
        let base = draw(id[0], &[id[1]], 0.0);
        let variants = [
            draw(id[0], &[id[1]], 2.0).with_composite(CompositeMode::Copy),
            draw(id[0], &[id[1]], 2.0).with_dst_region(Region::new(0.0, 0.0, 1.0, 1.0)),
            draw(id[0], &[id[1]], 2.0).with_invert_y(true),
            draw(id[0], &[id[1]], 2.0).with_even_odd(true),
        ];
        for next in variants {
            let mut a = base.clone();
            assert!(try_merge(&mut a, next, 65536).is_err());
            assert_eq!(a, base);
        }
    }

    #[test]
    fn slot_overflow_is_refused() {
        let id = ids(7);
        let mut a = draw(id[0], &id[1..5], 0.0);
        let b = draw(id[0], &[id[5]], 0.0);
        assert!(try_merge(&mut a, b, 65536).is_err());
        assert_eq!(a.sources.len(), 4);
    }

    #[test]
    fn sourceless_builtin_draw_is_refused() {
        let id = ids(2);
        let mut a = draw(id[0], &[], 0.0);
        assert!(try_merge(&mut a, draw(id[0], &[id[1]], 2.0), 65536).is_err());

        let mut b = draw(id[0], &[id[1]], 0.0);
        assert!(try_merge(&mut b, draw(id[0], &[], 2.0), 65536).is_err());
        assert_eq!(b.vertices.len(), 4);
    }

    #[test]
    fn vertex_budget_is_respected() {
        let id = ids(2);
        let mut a = draw(id[0], &[id[1]], 0.0);
        assert!(try_merge(&mut a, draw(id[0], &[id[1]], 2.0), 7).is_err());
    }
}
