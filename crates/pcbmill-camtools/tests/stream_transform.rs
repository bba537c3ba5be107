use pcbmill_camtools::geometry::{AffineTransform, Point};
use pcbmill_camtools::gerber::{GerberStreamTransformer, TransformOptions};
use proptest::prelude::*;
use std::io::Cursor;

fn rewrite(transform: AffineTransform, input: &str) -> String {
    let transformer = GerberStreamTransformer::new(transform, TransformOptions::default());
    let mut out = Vec::new();
    transformer
        .transform_gerber(Cursor::new(input.as_bytes()), &mut out)
        .unwrap();
    String::from_utf8(out).unwrap()
}

/// Pull the integer fields of one coordinate line
fn field(line: &str, axis: char) -> Option<i64> {
    let start = line.find(axis)? + 1;
    let digits: String = line[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-' || *c == '+')
        .collect();
    digits.parse().ok()
}

const HEADER: &str = "G04 generated*\n%FSLAX46Y46*%\n%MOMM*%\n%LPD*%\n%ADD10C,0.250000*%\nD10*\n";

proptest! {
    #[test]
    fn identity_round_trip_is_byte_identical(
        coords in prop::collection::vec((-99_999_999i64..99_999_999, -99_999_999i64..99_999_999), 1..30)
    ) {
        let mut input = String::from(HEADER);
        for (i, (x, y)) in coords.iter().enumerate() {
            let d = if i == 0 { "D02" } else { "D01" };
            input.push_str(&format!("X{}Y{}{}*\n", x, y, d));
        }
        input.push_str("M02*\n");

        prop_assert_eq!(rewrite(AffineTransform::identity(), &input), input);
    }
}

#[test]
fn identity_fills_modal_axes_without_changing_values() {
    let input = format!("{}X1000000Y2000000D02*\nX3000000D01*\nY500000D01*\nM02*\n", HEADER);
    let out = rewrite(AffineTransform::identity(), &input);

    let in_lines: Vec<&str> = input.lines().collect();
    let out_lines: Vec<&str> = out.lines().collect();
    assert_eq!(in_lines.len(), out_lines.len());

    let header_lines = HEADER.lines().count();
    assert_eq!(in_lines[..header_lines], out_lines[..header_lines]);
    assert_eq!(out_lines[header_lines + 1], "X3000000Y2000000D01*");
    assert_eq!(out_lines[header_lines + 2], "X3000000Y500000D01*");
    assert_eq!(out_lines.last(), Some(&"M02*"));
}

#[test]
fn arc_offsets_rotate_as_relative_vectors() {
    // Quarter arc from (10, 0) to (0, 10) around the origin
    let input = format!(
        "{}X10000000Y0D02*\nG03X0Y10000000I-10000000J0D01*\nM02*\n",
        HEADER
    );
    let out = rewrite(AffineTransform::rotate90(false), &input);
    let arc = out.lines().find(|l| l.starts_with("G03")).unwrap();

    // Start maps to (0, 10), center stays at the origin: offset (0, -10).
    // Mapping the absolute center and subtracting the untransformed start
    // would give (-10, 0) instead.
    assert_eq!(arc, "G03X-10000000Y0I0J-10000000D01*");
}

#[test]
fn arc_offsets_under_rotation_and_translation() {
    let theta = 0.3f64;
    let t = AffineTransform::rotate(theta).then(&AffineTransform::translate(5.0, 7.0));
    let input = format!(
        "{}X20000000Y5000000D02*\nG02X25000000Y10000000I2500000J-1500000D01*\nM02*\n",
        HEADER
    );
    let out = rewrite(t, &input);
    let arc = out.lines().find(|l| l.starts_with("G02")).unwrap();

    let offset = Point::new(2.5, -1.5);
    let (s, c) = theta.sin_cos();
    let want_i = ((offset.x * c - offset.y * s) * 1e6).round() as i64;
    let want_j = ((offset.x * s + offset.y * c) * 1e6).round() as i64;
    assert!((field(arc, 'I').unwrap() - want_i).abs() <= 1);
    assert!((field(arc, 'J').unwrap() - want_j).abs() <= 1);

    let end = t.apply(Point::new(25.0, 10.0));
    assert!((field(arc, 'X').unwrap() - (end.x * 1e6).round() as i64).abs() <= 1);
    assert!(arc.ends_with("D01*"));
}

#[test]
fn non_coordinate_lines_pass_through_untouched() {
    let input = "%FSLAX46Y46*%\r\n%TF.FileFunction,Copper,L1,Top*%\r\nG04 odd  spacing *\r\n%AMOC8*\r\n5,1,8,0,0,1.08239X$1,22.5*%\r\n";
    assert_eq!(rewrite(AffineTransform::translate(3.0, 3.0), input), input);
}
