use log::{info, warn};

use crate::block::GridBlock;
use crate::error::{Error, Result};
use crate::field::{Centering, Field};
use crate::index_space::{Index, IndexSpace};
use crate::metadata::{BlockKey, Hierarchy, LevelInfo};
use crate::resample::split_axis;




/**
 * Build an AMR hierarchy from a single uniform image. The image becomes the
 * finest level; each coarser level averages `ratio^3` cells of the level
 * above it, so every level covers the whole image. Levels are split into
 * slabs along their longest axis, level `l` into `2^l` blocks, as far as the
 * block budget allows while leaving at least one block for every remaining
 * level.
 *
 * Only cell-centered fields of the image are carried over.
 */
pub fn image_to_amr(
    image: &GridBlock,
    number_of_levels: usize,
    refinement_ratio: i64,
    maximum_number_of_blocks: usize) -> Result<Hierarchy>
{
    if number_of_levels < 1 {
        return Err(Error::InvalidConfiguration("number_of_levels must be at least 1".into()));
    }
    if refinement_ratio < 2 {
        return Err(Error::InvalidConfiguration("refinement_ratio must be at least 2".into()));
    }
    if maximum_number_of_blocks < number_of_levels {
        return Err(Error::InvalidConfiguration(format!(
            "{} blocks cannot cover {} levels",
            maximum_number_of_blocks, number_of_levels)));
    }
    image.validate("image")?;

    let interior = image.interior();
    let coarsest = refinement_ratio.pow(number_of_levels as u32 - 1);
    let (ni, nj, nk) = interior.dim();

    if [ni, nj, nk].iter().any(|&n| n as i64 % coarsest != 0) {
        return Err(Error::InvalidConfiguration(format!(
            "image of {:?} cells is not divisible by {} for {} levels",
            (ni, nj, nk), coarsest, number_of_levels)));
    }

    for (name, field) in image.fields() {
        if field.centering() != Centering::Cell {
            warn!("field `{}` is not cell-centered and is dropped", name);
        }
    }

    // Levels are built finest first, each from the one above it.
    let finest = to_local_origin(image)?;
    let mut levels = vec![finest];

    for _ in 1..number_of_levels {
        let fine = levels.last().ok_or_else(|| Error::InvalidConfiguration("no levels".into()))?;
        let coarse = coarsen(fine, refinement_ratio)?;
        levels.push(coarse);
    }
    levels.reverse();

    let mut used = 0;
    let mut splits = Vec::with_capacity(number_of_levels);

    for (l, grid) in levels.iter().enumerate() {
        let remaining_levels = number_of_levels - l - 1;
        let budget = maximum_number_of_blocks - used - remaining_levels;
        let cells = grid.extent().end();
        let axis = split_axis(cells).index();
        let count = (1usize << l.min(30)).min(budget).min(cells[axis] as usize).max(1);
        used += count;
        splits.push(count);
    }

    let infos = levels
        .iter()
        .zip(&splits)
        .map(|(grid, &count)| LevelInfo {
            whole_extent: Some(grid.extent().clone()),
            num_blocks: count,
        })
        .collect();

    let mut hierarchy = Hierarchy::new(infos);

    for (l, (grid, &count)) in levels.iter().zip(&splits).enumerate() {
        for (index, block) in slabs(grid, l as u32, count)?.into_iter().enumerate() {
            hierarchy.insert(BlockKey::new(l as u32, index), block)?;
        }
    }

    info!(
        "built {} levels with {} blocks from an image of {:?} cells",
        number_of_levels, used, (ni, nj, nk));
    Ok(hierarchy)
}




/**
 * Return a copy of the image's interior with the cell fields only, indexed
 * from zero at the lower corner.
 */
fn to_local_origin(image: &GridBlock) -> Result<GridBlock> {
    let interior = image.interior();
    let bounds = image.bounds();
    let (ni, nj, nk) = interior.dim();
    let extent = IndexSpace::from_corners([0; 3], [ni as i64, nj as i64, nk as i64]);
    let start = interior.start();

    let mut grid = GridBlock::new(image.level(), bounds.min, image.spacing(), extent.clone());

    for (name, field) in image.fields().filter(|(_, f)| f.centering() == Centering::Cell) {
        let mut data = Vec::with_capacity(extent.len() * field.num_components());

        for [i, j, k] in extent.iter() {
            let index: Index = [i + start[0], j + start[1], k + start[2]];
            let offset = image.extent().row_major_offset(index);
            data.extend_from_slice(field.tuple(offset));
        }
        grid.insert_field(name, Field::from_vec(Centering::Cell, field.num_components(), data)?)?;
    }
    Ok(grid)
}




/**
 * Average blocks of `r^3` cells of a zero-based grid into a grid `r` times
 * coarser.
 */
fn coarsen(fine: &GridBlock, r: i64) -> Result<GridBlock> {
    let extent = fine.extent().coarsen([r; 3]);
    let spacing = fine.spacing().map(|h| h * r as f64);
    let mut coarse = GridBlock::new(fine.level(), fine.origin(), spacing, extent.clone());
    let weight = 1.0 / (r * r * r) as f64;

    for (name, field) in fine.fields() {
        let nc = field.num_components();
        let mut data = vec![0.0; extent.len() * nc];

        for (n, [i, j, k]) in extent.iter().enumerate() {
            let children = IndexSpace::from_corners([i * r, j * r, k * r], [(i + 1) * r, (j + 1) * r, (k + 1) * r]);

            for child in children.iter() {
                let values = field.tuple(fine.extent().row_major_offset(child));

                for c in 0..nc {
                    data[n * nc + c] += weight * values[c];
                }
            }
        }
        coarse.insert_field(name, Field::from_vec(Centering::Cell, nc, data)?)?;
    }
    Ok(coarse)
}




/**
 * Split a zero-based grid into `count` slabs along its longest axis, as
 * blocks of the given level.
 */
fn slabs(grid: &GridBlock, level: u32, count: usize) -> Result<Vec<GridBlock>> {
    let cells = grid.extent().end();
    let a = split_axis(cells).index();
    let m = count as i64;
    let mut blocks = Vec::with_capacity(count);

    for s in 0..m {
        let mut start = [0; 3];
        let mut end = cells;
        start[a] = s * cells[a] / m;
        end[a] = (s + 1) * cells[a] / m;
        let extent = IndexSpace::from_corners(start, end);

        let mut block = GridBlock::new(level, grid.origin(), grid.spacing(), extent.clone());

        for (name, field) in grid.fields() {
            let nc = field.num_components();
            let mut data = Vec::with_capacity(extent.len() * nc);

            for index in extent.iter() {
                data.extend_from_slice(field.tuple(grid.extent().row_major_offset(index)));
            }
            block.insert_field(name, Field::from_vec(Centering::Cell, nc, data)?)?;
        }
        blocks.push(block);
    }
    Ok(blocks)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::index_space::range3d;

    fn image(n: i64) -> GridBlock {
        GridBlock::new(0, [0.0; 3], [0.25; 3], range3d(0..n, 0..n, 0..n))
            .with_field_function("rho", Centering::Cell, 1, |[i, _, _], s| s[0] = i as f64)
    }

    #[test]
    fn levels_average_the_image() {
        let h = image_to_amr(&image(8), 2, 2, 8).unwrap();
        assert_eq!(h.num_levels(), 2);
        assert_eq!(h.levels()[0].num_blocks, 1);
        assert_eq!(h.levels()[1].num_blocks, 2);

        let coarse = h.get(&BlockKey::new(0, 0)).unwrap();
        assert_eq!(coarse.spacing(), [0.5; 3]);
        assert_eq!(coarse.extent(), &range3d(0..4, 0..4, 0..4));
        assert_eq!(coarse.get_slice("rho", [1, 0, 0]), Some(&[2.5][..]));

        let fine = h.get(&BlockKey::new(1, 1)).unwrap();
        assert_eq!(fine.extent(), &range3d(4..8, 0..8, 0..8));
        assert_eq!(fine.get_slice("rho", [5, 0, 0]), Some(&[5.0][..]));
    }

    #[test]
    fn block_budget_leaves_one_block_per_level() {
        let h = image_to_amr(&image(8), 3, 2, 4).unwrap();
        let counts: Vec<_> = h.levels().iter().map(|l| l.num_blocks).collect();
        assert_eq!(counts, vec![1, 2, 1]);
        assert_eq!(h.len(), 4);
    }

    #[test]
    fn indivisible_image_is_rejected() {
        assert!(image_to_amr(&image(6), 3, 2, 8).is_err());
        assert!(image_to_amr(&image(8), 2, 1, 8).is_err());
        assert!(image_to_amr(&image(8), 3, 2, 2).is_err());
    }
}
