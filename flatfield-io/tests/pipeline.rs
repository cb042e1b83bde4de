#![allow(clippy::cast_possible_truncation)]
//! End-to-end runs over a synthetic LIF container and TIFF calibrations.

use flatfield_algorithms::{
    correct_pixel, generate_flat_fields, AssemblerOptions, CalibrationFieldLoader, ImageAssembler,
};
use flatfield_core::{Channel, Tilescan};
use flatfield_io::{read_stack, LifFile, TiffStackReader, TiffVolumeSink};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::TempDir;
use tiff::decoder::ifd::Value;
use tiff::decoder::Decoder;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const Y: usize = 4;
const X: usize = 5;
const DARK_LEVELS: [u16; 4] = [2, 4, 6, 8];

struct SyntheticImage {
    name: &'static str,
    channels: usize,
    nz: usize,
    n_mosaic: usize,
}

fn pixel(image: usize, m: usize, z: usize, c: usize, y: usize, x: usize) -> u8 {
    (30 + image * 3 + m * 20 + z * 10 + c * 5 + y + x) as u8
}

fn utf16(text: &str) -> Vec<u8> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let mut out = (units.len() as u32).to_le_bytes().to_vec();
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

fn image_xml(scan: &SyntheticImage, block: &str) -> String {
    let plane = Y * X;
    let channels: String = (0..scan.channels)
        .map(|c| format!(r#"<ChannelDescription Resolution="8" BytesInc="{}"/>"#, c * plane))
        .collect();
    format!(
        r#"<Element Name="{name}"><Data><Image><ImageDescription>
<Channels>{channels}</Channels>
<Dimensions>
<DimensionDescription DimID="1" NumberOfElements="{X}" Length="8e-06" Unit="m" BytesInc="1"/>
<DimensionDescription DimID="2" NumberOfElements="{Y}" Length="6e-06" Unit="m" BytesInc="{X}"/>
<DimensionDescription DimID="3" NumberOfElements="{nz}" Length="4e-06" Unit="m" BytesInc="{z_inc}"/>
<DimensionDescription DimID="10" NumberOfElements="{nm}" Length="0" Unit="" BytesInc="{m_inc}"/>
</Dimensions></ImageDescription></Image></Data>
<Memory Size="{size}" MemoryBlockID="{block}"/></Element>"#,
        name = scan.name,
        nz = scan.nz,
        nm = scan.n_mosaic,
        z_inc = scan.channels * plane,
        m_inc = scan.nz * scan.channels * plane,
        size = scan.n_mosaic * scan.nz * scan.channels * plane,
    )
}

fn image_bytes(index: usize, scan: &SyntheticImage) -> Vec<u8> {
    let mut out = Vec::new();
    for m in 0..scan.n_mosaic {
        for z in 0..scan.nz {
            for c in 0..scan.channels {
                for y in 0..Y {
                    for x in 0..X {
                        out.push(pixel(index, m, z, c, y, x));
                    }
                }
            }
        }
    }
    out
}

fn write_lif(path: &Path, scans: &[SyntheticImage]) {
    let blocks: Vec<String> = (0..scans.len()).map(|i| format!("MemBlock_{i}")).collect();
    let children: String = scans
        .iter()
        .zip(&blocks)
        .map(|(scan, block)| image_xml(scan, block))
        .collect();
    let xml = format!(
        r#"<LMSDataContainerHeader Version="2"><Element Name="Project"><Data><Experiment/></Data><Children>{children}</Children></Element></LMSDataContainerHeader>"#
    );

    let mut out = Vec::new();
    let header = utf16(&xml);
    out.extend_from_slice(&0x70u32.to_le_bytes());
    out.extend_from_slice(&(header.len() as u32 + 1).to_le_bytes());
    out.push(0x2A);
    out.extend_from_slice(&header);
    for (index, (scan, block)) in scans.iter().zip(&blocks).enumerate() {
        let data = image_bytes(index, scan);
        out.extend_from_slice(&0x70u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(0x2A);
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.push(0x2A);
        out.extend_from_slice(&utf16(block));
        out.extend_from_slice(&data);
    }
    let mut file = File::create(path).unwrap();
    file.write_all(&out).unwrap();
}

fn write_u16_stack(path: &Path, levels: &[u16]) {
    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
    for &level in levels {
        let data = vec![level; Y * X];
        encoder
            .write_image::<colortype::Gray16>(X as u32, Y as u32, &data)
            .unwrap();
    }
}

fn fixture() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let lif = dir.path().join("acquisition.lif");
    write_lif(
        &lif,
        &[
            SyntheticImage {
                name: "TileScan 1",
                channels: 2,
                nz: 3,
                n_mosaic: 2,
            },
            SyntheticImage {
                name: "Single",
                channels: 1,
                nz: 1,
                n_mosaic: 2,
            },
            SyntheticImage {
                name: "Flat 1",
                channels: 1,
                nz: 2,
                n_mosaic: 3,
            },
        ],
    );
    write_u16_stack(&dir.path().join("dark.tif"), &DARK_LEVELS);
    // 488 uses dark plane 2 (6), 561 uses dark plane 1 (4).
    write_u16_stack(&dir.path().join("flat488.tif"), &[56, 56, 56]);
    write_u16_stack(&dir.path().join("flat561.tif"), &[54]);
    (dir, lif)
}

#[test]
fn test_lif_metadata() {
    let (_dir, lif) = fixture();
    let file = LifFile::open(&lif).unwrap();
    let names: Vec<&str> = file.images().iter().map(|i| i.info().name.as_str()).collect();
    assert_eq!(names, ["TileScan 1", "Single", "Flat 1"]);

    let info = file.images()[0].info();
    assert_eq!(info.dims, (Y, X));
    assert_eq!((info.nz, info.channels, info.n_mosaic), (3, 2, 2));
    assert!((info.scale.x - 0.5).abs() < 1e-9);
    assert!((info.scale.z - 0.5).abs() < 1e-9);

    let frame = file.images()[0].frame(2, 0, 1, 1).unwrap();
    assert_eq!(frame[[3, 4]], pixel(0, 1, 2, 1, 3, 4));
}

#[test]
fn test_correct_acquisition_to_tiff() {
    let (dir, lif) = fixture();
    let images = LifFile::open(&lif).unwrap().into_images();

    let loader = CalibrationFieldLoader::new(TiffStackReader);
    let config = loader
        .load_config(
            &dir.path().join("dark.tif"),
            &[
                (Channel::Nm488, dir.path().join("flat488.tif")),
                (Channel::Nm561, dir.path().join("flat561.tif")),
            ],
        )
        .unwrap();

    let mut sink = TiffVolumeSink::beside(&lif, "corrected").unwrap();
    let summary = ImageAssembler::new(&config, AssemblerOptions::default())
        .run(&images, &mut sink)
        .unwrap();
    assert_eq!(summary.tilescans_corrected, 2);
    assert_eq!(summary.tilescans_skipped, 1);
    assert_eq!(summary.volumes_written, 5);
    assert_eq!(sink.dir(), dir.path().join("corrected"));

    let path = dir.path().join("corrected").join("TileScan 1-1.tif");
    assert!(sink.written().contains(&path));
    let stack = read_stack(&path).unwrap();
    assert_eq!(stack.dim(), (6, Y, X));
    let darks = [6.0, 4.0];
    for z in 0..3 {
        for c in 0..2 {
            let page = z * 2 + c;
            let expected = correct_pixel(pixel(0, 1, z, c, 2, 3), darks[c], 50.0, 50.0);
            assert_eq!(stack[[page, 2, 3]], f64::from(expected));
        }
    }

    let mut decoder = Decoder::new(File::open(&path).unwrap()).unwrap();
    let description = decoder.get_tag_ascii_string(Tag::ImageDescription).unwrap();
    assert!(description.starts_with("ImageJ="));
    assert!(description.contains("images=6\n"));
    assert!(description.contains("channels=2\n"));
    assert!(description.contains("slices=3\n"));
    assert!(description.contains("axes=TZCYX\n"));
    assert!(description.contains("PhysicalSizeX=2\n"));

    // 0.5 pixels per micrometre on both axes, unitless, on every page
    let mut pages = 0;
    loop {
        let x_res = decoder.get_tag(Tag::XResolution).unwrap();
        let y_res = decoder.get_tag(Tag::YResolution).unwrap();
        assert!(matches!(x_res, Value::Rational(1, 2)), "{x_res:?}");
        assert!(matches!(y_res, Value::Rational(1, 2)), "{y_res:?}");
        assert_eq!(decoder.get_tag_u32(Tag::ResolutionUnit).unwrap(), 1);
        pages += 1;
        if !decoder.more_images() {
            break;
        }
        decoder.next_image().unwrap();
    }
    assert_eq!(pages, 6);

    assert!(dir.path().join("corrected").join("Flat 1-2.tif").exists());
    assert!(!dir.path().join("corrected").join("Single-0.tif").exists());
}

#[test]
fn test_flat_fields_to_tiff() {
    let (dir, lif) = fixture();
    let images = LifFile::open(&lif).unwrap().into_images();

    let mut sink = TiffVolumeSink::beside(&lif, "flat-fields").unwrap();
    let report = generate_flat_fields(&images, &mut sink);
    assert_eq!(report.written, ["Single", "Flat 1"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "TileScan 1");
    assert!(report.failed[0].1.is_configuration());

    let stack = read_stack(dir.path().join("flat-fields").join("Flat 1.tif")).unwrap();
    assert_eq!(stack.dim(), (2, Y, X));
    for z in 0..2 {
        // three tiles: the median is the middle one
        assert_eq!(stack[[z, 1, 1]], f64::from(pixel(2, 1, z, 0, 1, 1)));
    }
}

#[test]
fn test_missing_calibration_file() {
    let (dir, _lif) = fixture();
    let loader = CalibrationFieldLoader::new(TiffStackReader);
    let err = loader
        .load_config(
            &dir.path().join("dark.tif"),
            &[(Channel::Nm647, dir.path().join("missing.tif"))],
        )
        .unwrap_err();
    assert!(matches!(err, flatfield_core::Error::Io(_)));
}
