use super::*;

#[test]
fn nested_box_sizes_are_patched() {
    let mut out = Vec::new();
    write_box(&mut out, b"moov", |out| {
        write_full_box(out, b"mvhd", 1, 0x000003, |out| out.put_u16(7));
    });
    assert_eq!(
        out,
        vec![
            0, 0, 0, 22, b'm', b'o', b'o', b'v', //
            0, 0, 0, 14, b'm', b'v', b'h', b'd', //
            1, 0, 0, 3, 0, 7,
        ]
    );
}

#[test]
fn descriptors_use_the_four_byte_length_form() {
    let mut out = Vec::new();
    write_descriptor(&mut out, 0x05, |out| out.put_bytes(&[0x11, 0x90]));
    assert_eq!(out, vec![0x05, 0x80, 0x80, 0x80, 0x02, 0x11, 0x90]);

    let mut big = Vec::new();
    write_descriptor(&mut big, 0x04, |out| out.put_zeros(200));
    assert_eq!(&big[..5], &[0x04, 0x80, 0x80, 0x81, 0x48]);
    assert_eq!(big.len(), 205);
}

#[test]
fn matrix_is_thirty_six_bytes() {
    let mut out = Vec::new();
    put_matrix(&mut out);
    assert_eq!(out.len(), 36);
    assert_eq!(&out[..4], &[0, 1, 0, 0]);
    assert_eq!(&out[32..], &[0x40, 0, 0, 0]);
}
