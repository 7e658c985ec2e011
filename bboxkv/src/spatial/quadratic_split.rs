//! Quadratic node splitting.
//!
//! The two seeds are the pair of boxes that would waste the most volume if
//! they were placed in the same node. The remaining items are then handed to
//! the group whose box grows least, unless one group must take every
//! remaining item to reach the minimum fill of `max_node_size / 2`.

use crate::entity::BoundingBox;

/// Finds the pair of indices maximizing `covering(a, b).volume - a.volume - b.volume`.
///
/// The first pair reaching the maximum wins, so the result is deterministic
/// for a given input order. `boxes` must hold at least two boxes.
pub(crate) fn pick_seeds(boxes: &[&BoundingBox]) -> (usize, usize) {
    let mut seeds = (0, 1);
    let mut max_waste = f64::NEG_INFINITY;

    for i in 0..boxes.len() {
        for j in (i + 1)..boxes.len() {
            let waste = boxes[i].covering_box(boxes[j]).volume()
                - boxes[i].volume()
                - boxes[j].volume();
            if waste > max_waste {
                max_waste = waste;
                seeds = (i, j);
            }
        }
    }
    seeds
}

/// Splits `items` into two groups.
///
/// Each group ends up with at least one item, and with at least
/// `max_node_size / 2` items whenever `items` is large enough to allow it.
pub(crate) fn quadratic_split<T, F>(
    items: Vec<T>,
    max_node_size: usize,
    bounding_box_of: F,
) -> (Vec<T>, Vec<T>)
where
    F: Fn(&T) -> BoundingBox,
{
    let boxes: Vec<BoundingBox> = items.iter().map(bounding_box_of).collect();
    let (seed1, seed2) = {
        let refs: Vec<&BoundingBox> = boxes.iter().collect();
        pick_seeds(&refs)
    };

    let min_fill = max_node_size / 2;
    let mut group1 = Vec::with_capacity(items.len());
    let mut group2 = Vec::with_capacity(items.len());
    let mut box1 = boxes[seed1].clone();
    let mut box2 = boxes[seed2].clone();
    let mut left = items.len() - 2;

    for (index, (item, item_box)) in items.into_iter().zip(boxes).enumerate() {
        if index == seed1 {
            group1.push(item);
            continue;
        }
        if index == seed2 {
            group2.push(item);
            continue;
        }

        let to_first = if group1.len() + left <= min_fill {
            true
        } else if group2.len() + left <= min_fill {
            false
        } else {
            let enlargement1 = box1.enlargement(&item_box);
            let enlargement2 = box2.enlargement(&item_box);
            if enlargement1 == enlargement2 {
                group1.len() <= group2.len()
            } else {
                enlargement1 < enlargement2
            }
        };
        left -= 1;

        if to_first {
            box1 = box1.covering_box(&item_box);
            group1.push(item);
        } else {
            box2 = box2.covering_box(&item_box);
            group2.push(item);
        }
    }

    (group1, group2)
}
