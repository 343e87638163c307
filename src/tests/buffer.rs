//! Host-side buffer behavior: dimensions, resize, conversion, metadata.

use serde_json::Value;

use crate::buffer::{Buffer, Depth, Location, Requisition};

#[test]
fn requisitions_are_bounded() {
    assert!(Requisition::new(&[]).is_err());
    assert!(Requisition::new(&[16, 16, 16, 16]).is_err());
    assert!(Requisition::new(&[16]).is_ok());
    assert!(Requisition::new(&[16, 16, 16]).is_ok());
}

#[test]
fn size_follows_the_requisition() {
    let requisition = Requisition::new_3d(123, 321, 4);
    let buffer = Buffer::new(requisition, None);

    assert_eq!(buffer.size_bytes(), 123 * 321 * 4 * std::mem::size_of::<f32>());
    assert_eq!(requisition.len(), 123 * 321 * 4);
}

#[test]
fn cmp_dimensions_is_zero_only_on_equality() {
    let buffer = Buffer::new(Requisition::new_2d(4, 4), None);

    assert_eq!(buffer.cmp_dimensions(&Requisition::new_2d(4, 4)), 0);
    assert!(buffer.cmp_dimensions(&Requisition::new_2d(8, 4)) > 0);
    assert!(buffer.cmp_dimensions(&Requisition::new_2d(2, 4)) < 0);

    /* The summed delta cancels out here; the comparison must not. */
    assert_ne!(buffer.cmp_dimensions(&Requisition::new_2d(3, 5)), 0);
    assert_ne!(buffer.cmp_dimensions(&Requisition::new_3d(4, 4, 1)), 0);
}

#[test]
fn resize_to_same_size_is_a_noop() {
    let mut buffer = Buffer::new(Requisition::new_1d(8), None);
    buffer.set_host_data(vec![7.0; 8]).unwrap();

    buffer.resize(Requisition::new_1d(8));
    assert_eq!(buffer.location(), Location::Host);
    assert_eq!(buffer.get_host(None).unwrap(), &[7.0; 8][..]);

    buffer.resize(Requisition::new_1d(4));
    assert_eq!(buffer.location(), Location::Invalid);
    assert_eq!(buffer.size_bytes(), 16);
}

#[test]
fn metadata_survives_a_resize() {
    let mut buffer = Buffer::new(Requisition::new_1d(8), None);
    buffer.set_metadata("filename", Value::from("slice-001.tif"));

    buffer.resize(Requisition::new_1d(4));
    assert_eq!(buffer.get_metadata("filename"), Some(&Value::from("slice-001.tif")));
}

#[test]
fn host_data_must_match_the_requisition() {
    assert!(Buffer::new_with_data(Requisition::new_1d(4), vec![0.0; 3], None).is_err());

    let mut buffer = Buffer::new_with_data(Requisition::new_1d(4),
        vec![1.0, 2.0, 3.0, 4.0], None).unwrap();
    assert_eq!(buffer.location(), Location::Host);
    assert_eq!(buffer.get_host(None).unwrap(), &[1.0, 2.0, 3.0, 4.0][..]);
}

#[test]
fn discard_location_reverts_without_copying() {
    let mut buffer = Buffer::new(Requisition::new_1d(4), None);
    assert_eq!(buffer.location(), Location::Invalid);

    buffer.set_host_data(vec![0.0; 4]).unwrap();
    assert_eq!(buffer.location(), Location::Host);

    buffer.discard_location();
    assert_eq!(buffer.location(), Location::Invalid);
}

#[test]
fn convert_promotes_u8_in_place() {
    /* Four u8 samples stored in the first bytes of the float array, as a
     * reader would leave them after a raw load. */
    let mut raw = [0u8; 16];
    raw[0] = 1;
    raw[1] = 2;
    raw[2] = 3;
    raw[3] = 4;

    let host: Vec<f32> = raw.chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let mut buffer = Buffer::new_with_data(Requisition::new_1d(4), host, None).unwrap();
    buffer.convert(Depth::U8).unwrap();

    assert_eq!(buffer.get_host(None).unwrap(), &[1.0, 2.0, 3.0, 4.0][..]);
}

#[test]
fn convert_promotes_u16_in_place() {
    let samples: [u16; 4] = [1, 2, 512, 65535];
    let mut raw = [0u8; 16];

    for (i, sample) in samples.iter().enumerate() {
        raw[2 * i..2 * i + 2].copy_from_slice(&sample.to_ne_bytes());
    }

    let host: Vec<f32> = raw.chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let mut buffer = Buffer::new_with_data(Requisition::new_1d(4), host, None).unwrap();
    buffer.convert(Depth::U16).unwrap();

    assert_eq!(buffer.get_host(None).unwrap(), &[1.0, 2.0, 512.0, 65535.0][..]);
}

#[test]
fn convert_requires_host_residence() {
    let mut buffer = Buffer::new(Requisition::new_1d(4), None);
    assert!(buffer.convert(Depth::U8).is_err());
}

#[test]
fn convert_from_external_data() {
    let mut buffer = Buffer::new(Requisition::new_1d(4), None);
    buffer.convert_from_data(&[5, 6, 7, 8], Depth::U8).unwrap();

    assert_eq!(buffer.location(), Location::Host);
    assert_eq!(buffer.get_host(None).unwrap(), &[5.0, 6.0, 7.0, 8.0][..]);

    assert!(buffer.convert_from_data(&[1, 2], Depth::U32).is_err());
}

#[test]
fn extrema_of_host_arrays() {
    let mut buffer = Buffer::new(Requisition::new_2d(2, 2), None);
    buffer.set_host_data(vec![4.0, -2.5, 7.0, 0.0]).unwrap();

    assert_eq!(buffer.max(None).unwrap(), 7.0);
    assert_eq!(buffer.min(None).unwrap(), -2.5);

    let empty = Buffer::new(Requisition::new_1d(4), None);
    assert!(empty.max(None).is_err());
}

#[test]
fn copy_transfers_host_contents_and_resizes() {
    let mut src = Buffer::new_with_data(Requisition::new_2d(5, 2),
        (0..10).map(|x| x as f32).collect(), None).unwrap();
    let mut dst = Buffer::new(Requisition::new_1d(3), None);

    Buffer::copy(&mut src, &mut dst).unwrap();

    assert_eq!(dst.requisition(), src.requisition());
    assert_eq!(dst.get_host(None).unwrap(), src.get_host(None).unwrap());
}

#[test]
fn copy_metadata_overwrites_per_key() {
    let mut src = Buffer::new(Requisition::new_1d(1), None);
    let mut dst = Buffer::new(Requisition::new_1d(1), None);

    src.set_metadata("foo", Value::from(1));
    src.set_metadata("bar", Value::from("keep"));
    dst.set_metadata("foo", Value::from(0));
    dst.set_metadata("own", Value::from(true));

    src.copy_metadata(&mut dst);

    assert_eq!(dst.get_metadata("foo"), Some(&Value::from(1)));
    assert_eq!(dst.get_metadata("bar"), Some(&Value::from("keep")));
    assert_eq!(dst.get_metadata("own"), Some(&Value::from(true)));
    assert_eq!(dst.metadata_keys().count(), 3);
}

#[test]
fn dup_shares_shape_but_not_contents() {
    let mut buffer = Buffer::new_with_data(Requisition::new_1d(2), vec![1.0, 2.0], None).unwrap();
    let copy = buffer.dup();

    assert_eq!(copy.requisition(), buffer.requisition());
    assert_eq!(copy.location(), Location::Invalid);
    assert_eq!(buffer.get_host(None).unwrap(), &[1.0, 2.0][..]);
}
