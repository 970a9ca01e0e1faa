use crate::types::{BoundingBox, Edit, ProcessedScene, SarError, SarResult};
use ndarray::s;

/// Pixel window `(row_start, row_end, col_start, col_end)` covering `region` on a scene grid.
///
/// Rows run from `max_lat` (row 0) to `min_lat`; columns from `min_lon` to
/// `max_lon`. Partially covered edge pixels are kept.
pub fn pixel_window(
    footprint: &BoundingBox,
    shape: (usize, usize),
    region: &BoundingBox,
) -> Option<(usize, usize, usize, usize)> {
    let (rows, cols) = shape;
    let overlap = footprint.intersection(region)?;
    if rows == 0 || cols == 0 {
        return None;
    }

    let lon_step = footprint.width() / cols as f64;
    let lat_step = footprint.height() / rows as f64;

    let col_start = ((overlap.min_lon - footprint.min_lon) / lon_step).floor() as usize;
    let col_end = ((overlap.max_lon - footprint.min_lon) / lon_step).ceil() as usize;
    let row_start = ((footprint.max_lat - overlap.max_lat) / lat_step).floor() as usize;
    let row_end = ((footprint.max_lat - overlap.min_lat) / lat_step).ceil() as usize;

    let window = (
        row_start.min(rows),
        row_end.min(rows),
        col_start.min(cols),
        col_end.min(cols),
    );
    if window.0 >= window.1 || window.2 >= window.3 {
        return None;
    }
    Some(window)
}

/// Crop every band of the scene to the region and shrink the footprint accordingly
pub fn clip_scene(scene: &mut ProcessedScene, region: &BoundingBox) -> SarResult<()> {
    let shape = match scene.shape() {
        Some(shape) => shape,
        None => {
            scene.edits.push(Edit::Clipped);
            return Ok(());
        }
    };

    if scene.bands.values().any(|b| b.dim() != shape) {
        return Err(SarError::Processing(format!(
            "Bands of scene {} do not share a grid",
            scene.id()
        )));
    }

    let footprint = scene.scene.footprint;
    let (r0, r1, c0, c1) = pixel_window(&footprint, shape, region).ok_or_else(|| {
        SarError::Processing(format!(
            "Region {:?} does not overlap scene {} footprint {:?}",
            region,
            scene.id(),
            footprint
        ))
    })?;

    log::debug!(
        "Clipping {} from {:?} to rows {}..{} cols {}..{}",
        scene.id(),
        shape,
        r0,
        r1,
        c0,
        c1
    );

    for raster in scene.bands.values_mut() {
        *raster = raster.slice(s![r0..r1, c0..c1]).to_owned();
    }

    let lon_step = footprint.width() / shape.1 as f64;
    let lat_step = footprint.height() / shape.0 as f64;
    scene.scene.footprint = BoundingBox {
        min_lon: footprint.min_lon + c0 as f64 * lon_step,
        max_lon: footprint.min_lon + c1 as f64 * lon_step,
        max_lat: footprint.max_lat - r0 as f64 * lat_step,
        min_lat: footprint.max_lat - r1 as f64 * lat_step,
    };
    scene.edits.push(Edit::Clipped);
    Ok(())
}
