use pcbmill_communication::{parse_data_line, DataLine};
use proptest::prelude::*;

proptest! {
    #[test]
    fn arbitrary_lines_never_panic(line in "\\PC{0,64}") {
        let _ = parse_data_line(&line);
    }

    #[test]
    fn probe_lines_keep_their_coordinates(
        x in -500.0f64..500.0,
        y in -500.0f64..500.0,
        z in -100.0f64..100.0,
        ok in any::<bool>(),
    ) {
        let line = format!("[PRB:{:.3},{:.3},{:.3}:{}]", x, y, z, ok as u8);
        match parse_data_line(&line) {
            DataLine::Probe(result) => {
                prop_assert!((result.x - x).abs() < 1e-3);
                prop_assert!((result.y - y).abs() < 1e-3);
                prop_assert!((result.z - z).abs() < 1e-3);
                prop_assert_eq!(result.ok, ok);
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn alarm_codes_are_recovered(code in 0u32..1000) {
        match parse_data_line(&format!("ALARM:{}", code)) {
            DataLine::Alarm { code: parsed, .. } => prop_assert_eq!(parsed, code),
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }
}
