//! Product name normalizer.
//!
//! Pure function from a raw listing title to a structured identity. Rules
//! evaluate left to right: chipset (closed set), brand (known list), vram,
//! OC flag, then the residual lineup token. Identical input always yields an
//! identical identity; failures are typed by the missing field.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use regex::Regex;

use crate::domain::constants::{canonical_brand, BRANDS};
use crate::domain::entities::{Chipset, ProductIdentity};
use crate::domain::errors::NormalizationError;

pub struct ProductNormalizer {
    chipset_re: Regex,
    brand_re: Regex,
    vram_re: Regex,
    oc_re: Regex,
    memory_type_re: Regex,
    family_re: Regex,
    punct_re: Regex,
}

impl ProductNormalizer {
    pub fn new() -> Self {
        let brands = BRANDS
            .iter()
            .map(|b| regex::escape(b))
            .collect::<Vec<_>>()
            .join("|");

        Self {
            // Optional RTX prefix; Ti and Super suffixes tolerate missing spaces.
            chipset_re: Regex::new(r"(?i)\b(?:rtx[\s-]*)?4070(?P<ti>[\s-]*ti)?(?P<super>[\s-]*super)?\b")
                .expect("static regex"),
            brand_re: Regex::new(&format!(r"(?i)\b({brands})\b")).expect("static regex"),
            vram_re: Regex::new(r"(?i)(\d+)\s*GB").expect("static regex"),
            oc_re: Regex::new(r"(?i)\b(OC|오버클럭|Overclock)\b").expect("static regex"),
            memory_type_re: Regex::new(r"(?i)\b(D6X?|GDDR6X?)\b").expect("static regex"),
            family_re: Regex::new(r"(?i)\b(지포스|GeForce)\b").expect("static regex"),
            punct_re: Regex::new(r"[^\w\s-]").expect("static regex"),
        }
    }

    /// Parse a raw product name into a structured identity.
    pub fn normalize(&self, product_name: &str) -> Result<ProductIdentity, NormalizationError> {
        let name = product_name.trim();
        if name.is_empty() {
            return Err(NormalizationError::EmptyName);
        }

        let (chipset, chipset_span) = self.extract_chipset(name)?;
        let (brand, brand_span) = self.extract_brand(name)?;
        let vram = self.extract_vram(name)?;
        let is_oc = self.oc_re.is_match(name);
        let model_name = self.extract_model_name(name, &brand_span, &chipset_span, &brand, chipset);

        Ok(ProductIdentity {
            brand,
            chipset,
            model_name,
            vram,
            is_oc,
        })
    }

    fn extract_chipset(&self, name: &str) -> Result<(Chipset, String), NormalizationError> {
        let caps = self.chipset_re.captures(name).ok_or_else(|| {
            NormalizationError::ChipsetNot4070Series {
                name: name.to_string(),
            }
        })?;

        let has_ti = caps.name("ti").is_some();
        let has_super = caps.name("super").is_some();
        let chipset = match (has_ti, has_super) {
            (false, false) => Chipset::Rtx4070,
            (false, true) => Chipset::Rtx4070Super,
            (true, false) => Chipset::Rtx4070Ti,
            (true, true) => Chipset::Rtx4070TiSuper,
        };

        let span = caps
            .get(0)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        Ok((chipset, span))
    }

    fn extract_brand(&self, name: &str) -> Result<(String, String), NormalizationError> {
        let m = self
            .brand_re
            .find(name)
            .ok_or_else(|| NormalizationError::BrandMissing {
                name: name.to_string(),
            })?;
        Ok((canonical_brand(m.as_str()), m.as_str().to_string()))
    }

    fn extract_vram(&self, name: &str) -> Result<String, NormalizationError> {
        let caps =
            self.vram_re
                .captures(name)
                .ok_or_else(|| NormalizationError::VramMissing {
                    name: name.to_string(),
                })?;
        Ok(format!("{}GB", &caps[1]))
    }

    /// Residual lineup token after removing brand, chipset, vram, OC markers
    /// and memory-type noise. Never empty: falls back to a chipset+brand
    /// hash when nothing meaningful remains.
    fn extract_model_name(
        &self,
        name: &str,
        brand_span: &str,
        chipset_span: &str,
        brand: &str,
        chipset: Chipset,
    ) -> String {
        let mut cleaned = name.replace(brand_span, " ");
        if !chipset_span.is_empty() {
            cleaned = cleaned.replace(chipset_span, " ");
        }
        let cleaned = self.vram_re.replace_all(&cleaned, " ");
        let cleaned = self.oc_re.replace_all(&cleaned, " ");
        let cleaned = self.memory_type_re.replace_all(&cleaned, " ");
        let cleaned = self.family_re.replace_all(&cleaned, " ");
        let cleaned = self.punct_re.replace_all(&cleaned, " ");

        let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.chars().count() > 2 {
            cleaned
        } else {
            Self::fallback_model_name(brand, chipset)
        }
    }

    fn fallback_model_name(brand: &str, chipset: Chipset) -> String {
        let mut hasher = DefaultHasher::new();
        brand.hash(&mut hasher);
        chipset.as_str().hash(&mut hasher);
        format!("{}-{:08X}", brand, hasher.finish() as u32)
    }
}

impl Default for ProductNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> ProductNormalizer {
        ProductNormalizer::new()
    }

    #[test]
    fn normalizes_full_korean_listing_title() {
        let identity = normalizer()
            .normalize("ASUS Dual 지포스 RTX 4070 SUPER O12G OC D6X 12GB")
            .unwrap();
        assert_eq!(identity.brand, "ASUS");
        assert_eq!(identity.chipset, Chipset::Rtx4070Super);
        assert!(identity.model_name.contains("Dual"));
        assert_eq!(identity.vram, "12GB");
        assert!(identity.is_oc);
    }

    #[test]
    fn rejects_non_4070_chipset() {
        let err = normalizer().normalize("ASUS RTX 3080 10GB").unwrap_err();
        assert!(matches!(err, NormalizationError::ChipsetNot4070Series { .. }));
    }

    #[test]
    fn rejects_missing_brand() {
        let err = normalizer()
            .normalize("지포스 RTX 4070 Ti 12GB")
            .unwrap_err();
        assert!(matches!(err, NormalizationError::BrandMissing { .. }));
    }

    #[test]
    fn rejects_missing_vram() {
        let err = normalizer().normalize("MSI RTX 4070 Ventus").unwrap_err();
        assert!(matches!(err, NormalizationError::VramMissing { .. }));
    }

    #[test]
    fn rejects_empty_name() {
        assert!(matches!(
            normalizer().normalize("   ").unwrap_err(),
            NormalizationError::EmptyName
        ));
    }

    #[test]
    fn chipset_variants_resolve_correctly() {
        let n = normalizer();
        let cases = [
            ("MSI RTX 4070 Ventus 12GB", Chipset::Rtx4070),
            ("MSI RTX 4070 Super Ventus 12GB", Chipset::Rtx4070Super),
            ("MSI RTX 4070 Ti Gaming 12GB", Chipset::Rtx4070Ti),
            ("MSI RTX 4070 Ti Super Gaming 16GB", Chipset::Rtx4070TiSuper),
            // Abbreviated spellings without the RTX prefix still resolve.
            ("MSI 4070 Super Ventus 12GB", Chipset::Rtx4070Super),
            ("MSI RTX4070 Ventus 12GB", Chipset::Rtx4070),
        ];
        for (input, expected) in cases {
            assert_eq!(n.normalize(input).unwrap().chipset, expected, "{input}");
        }
    }

    #[test]
    fn oc_detection_covers_all_markers() {
        let n = normalizer();
        assert!(n.normalize("ZOTAC RTX 4070 Twin Edge OC 12GB").unwrap().is_oc);
        assert!(n
            .normalize("이엠텍 RTX 4070 스톰 X 오버클럭 12GB")
            .unwrap()
            .is_oc);
        assert!(n
            .normalize("PALIT RTX 4070 Dual Overclock 12GB")
            .unwrap()
            .is_oc);
        assert!(!n.normalize("ZOTAC RTX 4070 Twin Edge 12GB").unwrap().is_oc);
    }

    #[test]
    fn korean_brands_canonicalize() {
        let n = normalizer();
        assert_eq!(
            n.normalize("기가바이트 RTX 4070 EAGLE 12GB").unwrap().brand,
            "GIGABYTE"
        );
        assert_eq!(
            n.normalize("이엠텍 RTX 4070 Ti 미라클 12GB").unwrap().brand,
            "EMTEK"
        );
    }

    #[test]
    fn normalization_is_deterministic() {
        let n = normalizer();
        let input = "GIGABYTE RTX 4070 SUPER GAMING OC 12GB";
        let a = n.normalize(input).unwrap();
        let b = n.normalize(input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn vram_format_is_digits_gb() {
        let n = normalizer();
        let identity = n.normalize("GAINWARD RTX 4070 Ti Super 고스트 16 GB").unwrap();
        assert_eq!(identity.vram, "16GB");
    }

    #[test]
    fn model_name_never_empty() {
        let n = normalizer();
        // Nothing left after stripping brand/chipset/vram: hash fallback kicks in.
        let identity = n.normalize("MSI RTX 4070 12GB").unwrap();
        assert!(!identity.model_name.is_empty());
        assert!(identity.model_name.starts_with("MSI-"));
        // And the fallback is stable.
        let again = n.normalize("MSI RTX 4070 12GB").unwrap();
        assert_eq!(identity.model_name, again.model_name);
    }
}
