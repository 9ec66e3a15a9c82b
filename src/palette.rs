use crate::taxonomy::{Category, Taxonomy};

pub const NO_DISEASE_COLOR: &str = "#4CAF50";

const FALLBACK_COLORS: [&str; 8] = [
    "#00BCD4", // cyan
    "#F44336", // red
    "#FFC107", // amber
    "#795548", // brown
    "#607D8B", // blue grey
    "#E91E63", // pink
    "#009688", // teal
    "#3F51B5", // indigo
];

pub fn category_color(category: Category) -> &'static str {
    match category {
        Category::Disease => "#2196F3",
        Category::NoDisease => NO_DISEASE_COLOR,
        Category::NoLeaf => "#757575",
        Category::Error => "#F44336",
        Category::Unknown => "#607D8B",
    }
}

/// `hash * 31 + unit` over the UTF-16 code units of `label`, wrapping at 32
/// bits. Depends only on the text.
pub fn label_hash(label: &str) -> i32 {
    label.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    })
}

pub fn fallback_color(label: &str) -> &'static str {
    let index = label_hash(label).unsigned_abs() as usize % FALLBACK_COLORS.len();
    FALLBACK_COLORS[index]
}

/// Display color for a normalized label.
///
/// Diseases use their catalog color, or a hashed fallback when the catalog
/// does not know them; the other categories use a fixed color each.
pub fn label_color(taxonomy: &Taxonomy, label: &str, category: Category) -> String {
    match category {
        Category::Disease => taxonomy
            .known_color(label)
            .unwrap_or_else(|| fallback_color(label))
            .to_string(),
        other => category_color(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_hash_matches_reference_values() {
        assert_eq!(label_hash(""), 0);
        assert_eq!(label_hash("a"), 97);
        assert_eq!(label_hash("ab"), 97 * 31 + 98);
    }

    #[test]
    fn test_label_hash_wraps_instead_of_overflowing() {
        let long = "Cercospora leaf spot on bitter gourd ".repeat(20);
        assert_eq!(label_hash(&long), label_hash(&long.clone()));
    }

    #[test]
    fn test_fallback_color_is_deterministic() {
        assert_eq!(fallback_color("a"), "#F44336");
        assert_eq!(fallback_color("b"), "#FFC107");
        for label in ["Leaf Spot", "Powdery Mildew", "Anthracnose"] {
            assert_eq!(fallback_color(label), fallback_color(label));
        }
    }

    #[test]
    fn test_known_diseases_use_catalog_colors() {
        let taxonomy = Taxonomy::builtin();
        assert_eq!(label_color(&taxonomy, "Mosaic Virus", Category::Disease), "#2196F3");
        assert_eq!(label_color(&taxonomy, "Downey Mildew", Category::Disease), "#FF9800");
        assert_eq!(label_color(&taxonomy, "Fusarium Wilt", Category::Disease), "#9C27B0");
    }

    #[test]
    fn test_unrecognized_disease_uses_fallback() {
        let taxonomy = Taxonomy::builtin();
        let color = label_color(&taxonomy, "Leaf Spot", Category::Disease);
        assert_eq!(color, fallback_color("Leaf Spot"));
        assert!(FALLBACK_COLORS.contains(&color.as_str()));
    }

    #[test]
    fn test_status_categories_use_fixed_colors() {
        let taxonomy = Taxonomy::builtin();
        assert_eq!(
            label_color(&taxonomy, "No Disease Detected", Category::NoDisease),
            NO_DISEASE_COLOR
        );
        assert_eq!(
            label_color(&taxonomy, "No Bitter Gourd Leaf Detected", Category::NoLeaf),
            "#757575"
        );
        assert_eq!(label_color(&taxonomy, "Error in Analysis", Category::Error), "#F44336");
        assert_eq!(label_color(&taxonomy, "Unknown", Category::Unknown), "#607D8B");
    }
}
