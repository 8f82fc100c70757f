//! GeoTIFF reading and writing on top of the `tiff` crate.
//!
//! The reader decodes whole chunks (strips or tiles) on demand, so a window
//! read through a range-capable source only touches the byte ranges of the
//! chunks it overlaps. The writer produces deflate-compressed GeoTIFFs with
//! ModelPixelScale/ModelTiepoint georeferencing, a minimal GeoKey directory
//! and a GDAL-style nodata tag.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use ndarray::Array2;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{Gray32Float, RGB32Float};
use tiff::encoder::{Compression, DeflateLevel, TiffEncoder};
use tiff::tags::Tag;

use glacierwatch_core::error::{GlacierError, Result};

use crate::grid::{GeoTransform, PixelWindow, Raster};

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_GT_MODEL_TYPE: u16 = 1024;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;

/// Chunk layout of an open GeoTIFF.
#[derive(Debug, Clone, Copy)]
enum ChunkLayout {
    /// Full-width strips of `chunk_height` rows.
    Stripped { chunk_height: u32 },
    /// Square-ish tiles laid out row-major.
    Tiled {
        tile_width: u32,
        tile_height: u32,
        tiles_per_row: u32,
    },
}

/// An open GeoTIFF with parsed georeferencing, ready for windowed reads.
pub struct GeoTiffReader<R: Read + Seek> {
    decoder: Decoder<R>,
    width: usize,
    height: usize,
    layout: ChunkLayout,
    transform: GeoTransform,
    epsg: u32,
    nodata: Option<f32>,
}

impl<R: Read + Seek> GeoTiffReader<R> {
    /// Open a GeoTIFF from any seekable source. `label` names the source in
    /// errors (a path or URL).
    pub fn open(source: R, label: &str) -> Result<Self> {
        let mut decoder = Decoder::new(source).map_err(|e| GlacierError::UnsupportedRaster {
            reason: format!("{label}: {e}"),
        })?;

        // DEM mosaics run to hundreds of megapixels.
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024 * 1024 * 1024;
        limits.intermediate_buffer_size = 1024 * 1024 * 1024;
        limits.ifd_value_size = 1024 * 1024 * 1024;
        decoder = decoder.with_limits(limits);

        let (width, height) =
            decoder
                .dimensions()
                .map_err(|e| GlacierError::UnsupportedRaster {
                    reason: format!("{label}: cannot read dimensions: {e}"),
                })?;

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let layout = if chunk_width == width {
            ChunkLayout::Stripped { chunk_height }
        } else {
            ChunkLayout::Tiled {
                tile_width: chunk_width,
                tile_height: chunk_height,
                tiles_per_row: (width + chunk_width - 1) / chunk_width,
            }
        };

        let transform = read_geotransform(&mut decoder, label)?;
        let epsg = read_epsg(&mut decoder).ok_or_else(|| GlacierError::MissingCrs {
            path: label.to_string(),
        })?;
        let nodata = read_nodata(&mut decoder);

        Ok(Self {
            decoder,
            width: width as usize,
            height: height as usize,
            layout,
            transform,
            epsg,
            nodata,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn transform(&self) -> GeoTransform {
        self.transform
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    /// Read a pixel window. Only the chunks the window overlaps are decoded
    /// (and, through a range reader, fetched).
    pub fn read_window(&mut self, window: &PixelWindow) -> Result<Array2<f32>> {
        let fill = self.nodata.unwrap_or(f32::NAN);
        let mut out = Array2::from_elem((window.height, window.width), fill);

        let (chunk_w, chunk_h, tiles_per_row) = match self.layout {
            ChunkLayout::Stripped { chunk_height } => (self.width as u32, chunk_height, 1),
            ChunkLayout::Tiled {
                tile_width,
                tile_height,
                tiles_per_row,
            } => (tile_width, tile_height, tiles_per_row),
        };

        let first_chunk_row = window.row_off as u32 / chunk_h;
        let last_chunk_row = (window.row_off + window.height - 1) as u32 / chunk_h;
        let first_chunk_col = window.col_off as u32 / chunk_w;
        let last_chunk_col = (window.col_off + window.width - 1) as u32 / chunk_w;

        for chunk_row in first_chunk_row..=last_chunk_row {
            for chunk_col in first_chunk_col..=last_chunk_col {
                let chunk_index = chunk_row * tiles_per_row + chunk_col;
                let chunk = self.read_chunk_f32(chunk_index)?;

                // Pixel extent this chunk covers.
                let chunk_x0 = (chunk_col * chunk_w) as usize;
                let chunk_y0 = (chunk_row * chunk_h) as usize;

                let x0 = chunk_x0.max(window.col_off);
                let y0 = chunk_y0.max(window.row_off);
                let x1 = (chunk_x0 + chunk_w as usize).min(window.col_off + window.width);
                let y1 = (chunk_y0 + chunk_h as usize).min(window.row_off + window.height);

                for y in y0..y1 {
                    for x in x0..x1 {
                        let local = (y - chunk_y0) * chunk_w as usize + (x - chunk_x0);
                        let value = chunk.get(local).copied().unwrap_or(fill);
                        out[[y - window.row_off, x - window.col_off]] = value;
                    }
                }
            }
        }

        Ok(out)
    }

    /// Read the full raster.
    pub fn read_all(&mut self) -> Result<Raster> {
        let window = PixelWindow {
            col_off: 0,
            row_off: 0,
            width: self.width,
            height: self.height,
        };
        let data = self.read_window(&window)?;
        Ok(Raster {
            data,
            transform: self.transform,
            epsg: self.epsg,
            nodata: self.nodata,
        })
    }

    fn read_chunk_f32(&mut self, chunk_index: u32) -> Result<Vec<f32>> {
        let result =
            self.decoder
                .read_chunk(chunk_index)
                .map_err(|e| GlacierError::UnsupportedRaster {
                    reason: format!("Cannot decode chunk {chunk_index}: {e}"),
                })?;
        Ok(decoding_result_to_f32(result))
    }
}

/// Open a local GeoTIFF file.
pub fn open_file(path: &Path) -> Result<GeoTiffReader<std::io::BufReader<File>>> {
    let file = File::open(path)?;
    GeoTiffReader::open(
        std::io::BufReader::new(file),
        &path.display().to_string(),
    )
}

fn decoding_result_to_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
    }
}

fn read_geotransform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    label: &str,
) -> Result<GeoTransform> {
    let tiepoint = decoder.get_tag_f64_vec(Tag::Unknown(TAG_MODEL_TIEPOINT));
    let scale = decoder.get_tag_f64_vec(Tag::Unknown(TAG_MODEL_PIXEL_SCALE));

    if let (Ok(tiepoint), Ok(scale)) = (tiepoint, scale) {
        if tiepoint.len() >= 6 && scale.len() >= 2 {
            // Tiepoint [i, j, k, x, y, z] ties pixel (i, j) to world (x, y);
            // in practice (i, j) is always (0, 0).
            return Ok(GeoTransform {
                origin_x: tiepoint[3] - tiepoint[0] * scale[0],
                origin_y: tiepoint[4] + tiepoint[1] * scale[1],
                pixel_width: scale[0],
                pixel_height: -scale[1],
            });
        }
    }

    Err(GlacierError::UnsupportedRaster {
        reason: format!("{label}: missing ModelTiepoint/ModelPixelScale tags"),
    })
}

fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let directory = decoder
        .get_tag_u32_vec(Tag::Unknown(TAG_GEO_KEY_DIRECTORY))
        .ok()?;
    if directory.len() < 4 {
        return None;
    }

    // Entries of [key_id, tag_location, count, value] after a 4-value header.
    let mut geographic = None;
    for entry in directory[4..].chunks_exact(4) {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key_id as u16 {
            KEY_PROJECTED_CS_TYPE => return Some(value),
            KEY_GEOGRAPHIC_TYPE => geographic = Some(value),
            _ => {}
        }
    }
    geographic
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
    if let Ok(text) = decoder.get_tag_ascii_string(Tag::Unknown(TAG_GDAL_NODATA)) {
        return text.trim().trim_end_matches('\0').parse().ok();
    }
    if let Ok(bytes) = decoder.get_tag_u8_vec(Tag::Unknown(TAG_GDAL_NODATA)) {
        let text = String::from_utf8_lossy(&bytes);
        return text.trim().trim_end_matches('\0').parse().ok();
    }
    None
}

/// Write a single-band raster as a deflate-compressed GeoTIFF.
pub fn write_geotiff(path: &Path, raster: &Raster) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let writer = BufWriter::new(file);

    let mut encoder = TiffEncoder::new(writer)
        .map_err(|e| tiff_write_error(path, e))?
        .with_compression(Compression::Deflate(DeflateLevel::Fast));

    let width = raster.width() as u32;
    let height = raster.height() as u32;
    let mut image = encoder
        .new_image::<Gray32Float>(width, height)
        .map_err(|e| tiff_write_error(path, e))?;
    write_geo_tags(
        image.encoder(),
        &raster.transform,
        raster.epsg,
        raster.nodata,
    )
    .map_err(|e| tiff_write_error(path, e))?;

    let pixels: Vec<f32> = raster.data.iter().copied().collect();
    image
        .write_data(&pixels)
        .map_err(|e| tiff_write_error(path, e))?;
    Ok(())
}

/// Write co-registered bands as one interleaved GeoTIFF. Exactly three
/// bands are supported; the only multiband product is the RGB composite.
pub fn write_geotiff_multiband(
    path: &Path,
    bands: &[&Array2<f32>],
    transform: &GeoTransform,
    epsg: u32,
    nodata: Option<f32>,
) -> Result<()> {
    if bands.len() != 3 {
        return Err(GlacierError::UnsupportedRaster {
            reason: format!("Expected 3 bands for a composite, got {}", bands.len()),
        });
    }
    let (height, width) = bands[0].dim();
    if bands.iter().any(|b| b.dim() != (height, width)) {
        return Err(GlacierError::UnsupportedRaster {
            reason: "Bands have mismatched dimensions".to_string(),
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let writer = BufWriter::new(file);

    let mut encoder = TiffEncoder::new(writer)
        .map_err(|e| tiff_write_error(path, e))?
        .with_compression(Compression::Deflate(DeflateLevel::Fast));

    let mut image = encoder
        .new_image::<RGB32Float>(width as u32, height as u32)
        .map_err(|e| tiff_write_error(path, e))?;
    write_geo_tags(image.encoder(), transform, epsg, nodata)
        .map_err(|e| tiff_write_error(path, e))?;

    let mut pixels = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        for col in 0..width {
            for band in bands {
                pixels.push(band[[row, col]]);
            }
        }
    }
    image
        .write_data(&pixels)
        .map_err(|e| tiff_write_error(path, e))?;
    Ok(())
}

fn write_geo_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
    dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
    transform: &GeoTransform,
    epsg: u32,
    nodata: Option<f32>,
) -> std::result::Result<(), tiff::TiffError> {
    let pixel_scale = [transform.pixel_width, -transform.pixel_height, 0.0];
    dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), pixel_scale.as_slice())?;

    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
    dir.write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), tiepoint.as_slice())?;

    // The only geographic CRS this pipeline ever writes is WGS84.
    let (model_type, cs_key) = if epsg == 4326 {
        (MODEL_TYPE_GEOGRAPHIC, KEY_GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, KEY_PROJECTED_CS_TYPE)
    };
    let geokeys: [u16; 12] = [
        1,
        1,
        0,
        2,
        KEY_GT_MODEL_TYPE,
        0,
        1,
        model_type,
        cs_key,
        0,
        1,
        epsg as u16,
    ];
    dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), geokeys.as_slice())?;

    if let Some(nodata) = nodata {
        let text = format!("{nodata}");
        dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), text.as_bytes())?;
    }

    Ok(())
}

fn tiff_write_error(path: &Path, e: tiff::TiffError) -> GlacierError {
    GlacierError::UnsupportedRaster {
        reason: format!("{}: {e}", path.display()),
    }
}
