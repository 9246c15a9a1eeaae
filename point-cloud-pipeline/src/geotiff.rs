/// Single-band GeoTIFF reading and writing on top of the `tiff` crate.
use crate::error::{PipelineError, Result};
use crate::raster::{GeoTransform, Raster};
use constants::raster::NODATA;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

/// GeoKey directory plus its parameter tables, copied verbatim between formats.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoKeys {
    pub key_directory: Vec<u16>,
    pub double_params: Vec<f64>,
    pub ascii_params: String,
}

impl GeoKeys {
    /// Projected model, pixel-is-area, no CRS code.
    pub fn minimal() -> Self {
        Self {
            key_directory: vec![1, 1, 0, 2, 1024, 0, 1, 1, 1025, 0, 1, 1],
            double_params: Vec::new(),
            ascii_params: String::new(),
        }
    }
}

pub fn read_geotiff(path: &Path) -> Result<Raster> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());

    match decoder.colortype()? {
        ColorType::Gray(_) => {}
        other => {
            return Err(PipelineError::InvalidRaster(format!(
                "{}: expected a single band raster, found {:?}",
                path.display(),
                other
            )));
        }
    }

    let (width, height) = decoder.dimensions()?;

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let transform = match (scale, tiepoint) {
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => GeoTransform {
            origin_x: tie[3] - tie[0] * scale[0],
            origin_y: tie[4] + tie[1] * scale[1],
            cell_width: scale[0],
            cell_height: scale[1],
        },
        _ => {
            tracing::warn!(
                "{} has no georeferencing tags, using pixel coordinates",
                path.display()
            );
            GeoTransform {
                origin_x: 0.0,
                origin_y: height as f64,
                cell_width: 1.0,
                cell_height: 1.0,
            }
        }
    };

    let nodata = match decoder.find_tag(Tag::GdalNodata)? {
        Some(value) => {
            let text = value.into_string()?;
            text.trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .parse::<f32>()
                .unwrap_or(NODATA)
        }
        None => NODATA,
    };

    let key_directory = decoder
        .find_tag(Tag::GeoKeyDirectoryTag)?
        .map(|v| v.into_u16_vec())
        .transpose()?;
    let geo_keys = match key_directory {
        Some(key_directory) => Some(GeoKeys {
            key_directory,
            double_params: decoder
                .find_tag(Tag::GeoDoubleParamsTag)?
                .map(|v| v.into_f64_vec())
                .transpose()?
                .unwrap_or_default(),
            ascii_params: decoder
                .find_tag(Tag::GeoAsciiParamsTag)?
                .map(|v| v.into_string())
                .transpose()?
                .unwrap_or_default(),
        }),
        None => None,
    };

    let data = decoding_to_f32(decoder.read_image()?)?;
    let mut raster = Raster::from_data(width as usize, height as usize, transform, nodata, data)?;
    raster.geo_keys = geo_keys;

    tracing::debug!(
        "Read {} ({}x{}, cell {}x{})",
        path.display(),
        raster.cols,
        raster.rows,
        raster.transform.cell_width,
        raster.transform.cell_height
    );
    Ok(raster)
}

pub fn write_geotiff(raster: &Raster, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let mut image =
        encoder.new_image::<colortype::Gray32Float>(raster.cols as u32, raster.rows as u32)?;

    let t = &raster.transform;
    let keys = raster.geo_keys.clone().unwrap_or_else(GeoKeys::minimal);
    let nodata = format!("{}", raster.nodata);

    {
        let tags = image.encoder();
        tags.write_tag(
            Tag::ModelPixelScaleTag,
            &[t.cell_width, t.cell_height, 0.0][..],
        )?;
        tags.write_tag(
            Tag::ModelTiepointTag,
            &[0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0][..],
        )?;
        tags.write_tag(Tag::GeoKeyDirectoryTag, &keys.key_directory[..])?;
        if !keys.double_params.is_empty() {
            tags.write_tag(Tag::GeoDoubleParamsTag, &keys.double_params[..])?;
        }
        if !keys.ascii_params.is_empty() {
            tags.write_tag(Tag::GeoAsciiParamsTag, keys.ascii_params.as_str())?;
        }
        tags.write_tag(Tag::GdalNodata, nodata.as_str())?;
    }

    image.write_data(&raster.data)?;
    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

fn decoding_to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    let data = match result {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(PipelineError::InvalidRaster(
                "unsupported sample format".to_string(),
            ));
        }
    };
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_raster_reads_back_with_georeferencing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tile.tif");

        let transform = GeoTransform {
            origin_x: 500_000.0,
            origin_y: 4_200_010.0,
            cell_width: 0.5,
            cell_height: 0.5,
        };
        let mut raster = Raster::new(4, 3, transform, NODATA);
        raster.set(0, 0, 12.5);
        raster.set(3, 2, -4.25);
        raster.geo_keys = Some(GeoKeys {
            key_directory: vec![1, 1, 0, 1, 3072, 0, 1, 26917],
            double_params: Vec::new(),
            ascii_params: String::new(),
        });
        write_geotiff(&raster, &path).unwrap();

        let back = read_geotiff(&path).unwrap();
        assert_eq!((back.cols, back.rows), (4, 3));
        assert_eq!(back.transform, transform);
        assert_eq!(back.nodata, NODATA);
        assert_eq!(back.get(0, 0), 12.5);
        assert_eq!(back.get(3, 2), -4.25);
        assert_eq!(back.value(1, 1), None);
        assert_eq!(back.geo_keys, raster.geo_keys);
    }

    #[test]
    fn rasters_without_keys_get_minimal_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("plain.tif");
        let transform = GeoTransform {
            origin_x: 0.0,
            origin_y: 2.0,
            cell_width: 1.0,
            cell_height: 1.0,
        };
        write_geotiff(&Raster::new(2, 2, transform, NODATA), &path).unwrap();

        let back = read_geotiff(&path).unwrap();
        assert_eq!(back.geo_keys, Some(GeoKeys::minimal()));
        assert_eq!(back.statistics().valid_cells, 0);
    }
}
