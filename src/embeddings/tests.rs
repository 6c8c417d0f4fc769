use super::*;

#[test]
fn normalize_scales_to_unit_length() {
    let mut vector = vec![3.0, 4.0];
    normalize(&mut vector);
    assert!((vector[0] - 0.6).abs() < 1e-6);
    assert!((vector[1] - 0.8).abs() < 1e-6);
}

#[test]
fn normalize_leaves_zero_vector() {
    let mut vector = vec![0.0; 4];
    normalize(&mut vector);
    assert_eq!(vector, vec![0.0; 4]);
}

#[test]
fn caption_accessors() {
    let caption = Caption::Text("dog".to_string());
    assert_eq!(caption.text(), Some("dog"));
    assert_eq!(caption.into_stored(), "dog");

    let missing = Caption::Unavailable("timeout".to_string());
    assert_eq!(missing.text(), None);
    assert_eq!(missing.into_stored(), "");
}
