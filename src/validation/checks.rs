//! Validation checks over a project and its library.
//!
//! Each check returns a `ValidationResult`.

use std::collections::{HashMap, HashSet};

use crate::library::{visit_recursively, Asset, Library};
use crate::project::ProjectConfig;
use crate::texture::{template, FormatTable, FormatType};

use super::warning::{Diagnostic, ValidationResult};

/// Every asset and sub-asset, in index order.
fn all_assets(library: &Library) -> Vec<&Asset> {
    let mut assets = Vec::new();
    for root in library.root_assets() {
        visit_recursively(root, &mut |asset: &Asset| {
            if let Some(found) = library.get(&asset.uuid) {
                assets.push(found);
            }
        });
    }
    assets
}

/// Two bundles with the same name would write into the same directory.
pub fn check_duplicate_bundles(config: &ProjectConfig) -> ValidationResult {
    let mut result = ValidationResult::new();
    let mut seen = HashSet::new();

    for bundle in &config.bundles {
        if !seen.insert(bundle.name.as_str()) {
            result.push(
                Diagnostic::error(
                    "bundlekit::validate::duplicate-bundle",
                    format!("Bundle '{}' is defined more than once", bundle.name),
                )
                .with_help("Bundle names must be unique"),
            );
        }
    }

    result
}

/// A bundle root nested in another bundle's root.
pub fn check_overlapping_roots(config: &ProjectConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    for (i, outer) in config.bundles.iter().enumerate() {
        for inner in config.bundles.iter().skip(i + 1) {
            let overlap = if outer.contains_url(inner.root.trim_end_matches('/')) {
                Some((outer, inner))
            } else if inner.contains_url(outer.root.trim_end_matches('/')) {
                Some((inner, outer))
            } else {
                None
            };
            let Some((parent, child)) = overlap else {
                continue;
            };
            result.push(
                Diagnostic::warning(
                    "bundlekit::validate::overlapping-roots",
                    format!(
                        "Bundle '{}' ({}) lies inside bundle '{}' ({})",
                        child.name, child.root, parent.name, parent.root
                    ),
                )
                .with_help("Shared assets go to the bundle with the higher priority"),
            );
        }
    }

    result
}

/// Presets named by assets must exist, formats must map to a codec, and
/// one platform's formats must not share an output extension.
pub fn check_texture_presets(config: &ProjectConfig, library: &Library) -> ValidationResult {
    let mut result = ValidationResult::new();
    let table = FormatTable::with_overrides(&config.format_types);

    for (name, platforms) in &config.texture_presets {
        for (platform, formats) in platforms {
            let mut extensions: HashMap<&str, &str> = HashMap::new();
            for option in formats {
                let Some(format_type) = FormatType::of(&option.format) else {
                    result.push(
                        Diagnostic::warning(
                            "bundlekit::validate::unknown-format",
                            format!(
                                "Preset '{}' ({}): no codec for format '{}'",
                                name, platform, option.format
                            ),
                        )
                        .with_help("Supported families: png, jpg, webp, pvrtc*, etc*, astc*"),
                    );
                    continue;
                };
                let extension = table.policy(format_type).extension.as_str();
                match extensions.get(extension).copied() {
                    Some(first) => result.push(
                        Diagnostic::warning(
                            "bundlekit::validate::shared-extension",
                            format!(
                                "Preset '{}' ({}): '{}' and '{}' both produce {} files; only '{}' is shipped",
                                name, platform, first, option.format, extension, first
                            ),
                        )
                        .with_help("Keep one format per extension for each platform"),
                    ),
                    None => {
                        extensions.insert(extension, option.format.as_str());
                    }
                }
            }
        }
    }

    let mut reported = HashSet::new();
    for asset in all_assets(library) {
        let Some(preset) = asset.user_data.compress_preset.as_deref() else {
            continue;
        };
        if !config.texture_presets.contains_key(preset) {
            result.push(
                Diagnostic::error(
                    "bundlekit::validate::unknown-preset",
                    format!("Asset {} uses texture preset '{}' which does not exist", asset, preset),
                )
                .with_help("Define it under texture_presets in bundlekit.yaml"),
            );
        } else if config.preset_formats(preset).is_none() && reported.insert(preset) {
            result.push(Diagnostic::warning(
                "bundlekit::validate::preset-platform",
                format!(
                    "Texture preset '{}' has no formats for platform '{}'; its images are not compressed",
                    preset, config.platform
                ),
            ));
        }
    }

    result
}

/// Custom codec templates must only use known placeholders, and assets
/// must only name defined codecs.
pub fn check_custom_codecs(config: &ProjectConfig, library: &Library) -> ValidationResult {
    let mut result = ValidationResult::new();

    for codec in &config.custom_codecs {
        if let Err(e) = template::validate(&codec.args) {
            result.push(
                Diagnostic::error(
                    "bundlekit::validate::codec-template",
                    format!("Custom codec '{}': {}", codec.name, e),
                )
                .with_help(format!("Placeholders: {}", template::PLACEHOLDERS.join(", "))),
            );
        }
    }

    for asset in all_assets(library) {
        let Some(name) = asset.user_data.custom_codec.as_deref() else {
            continue;
        };
        if config.custom_codec(name).is_none() {
            result.push(
                Diagnostic::error(
                    "bundlekit::validate::unknown-codec",
                    format!("Asset {} uses custom codec '{}' which does not exist", asset, name),
                )
                .with_help("Define it under custom_codecs in bundlekit.yaml"),
            );
        }
    }

    result
}

/// Dependencies on uuids the library does not hold.
pub fn check_missing_dependencies(library: &Library) -> ValidationResult {
    let mut result = ValidationResult::new();

    for asset in all_assets(library) {
        for dep in &asset.depends {
            if library.get(dep).is_none() {
                result.push(Diagnostic::warning(
                    "bundlekit::validate::missing-dependency",
                    format!("Asset {} depends on {} which is not in the library", asset, dep),
                ));
            }
        }
    }

    result
}

/// Two assets of the same type at one url load ambiguously.
pub fn check_duplicate_urls(library: &Library) -> ValidationResult {
    let mut result = ValidationResult::new();
    let mut seen: HashMap<(&str, &str), &str> = HashMap::new();

    for asset in all_assets(library) {
        if asset.url.is_empty() {
            continue;
        }
        let key = (asset.url.as_str(), asset.kind.as_str());
        match seen.get(&key).copied() {
            Some(first) => result.push(
                Diagnostic::warning(
                    "bundlekit::validate::duplicate-url",
                    format!("{} and {} share url {} ({})", first, asset.uuid, asset.url, asset.kind),
                )
                .with_help("Loading by path returns only one of them"),
            ),
            None => {
                seen.insert(key, asset.uuid.as_str());
            }
        }
    }

    result
}

/// Bundles whose root matches no asset.
pub fn check_empty_bundles(config: &ProjectConfig, library: &Library) -> ValidationResult {
    let mut result = ValidationResult::new();

    for bundle in &config.bundles {
        if !library.root_assets().any(|a| bundle.contains_url(&a.url)) {
            result.push(Diagnostic::warning(
                "bundlekit::validate::empty-bundle",
                format!("Bundle '{}' has no assets under {}", bundle.name, bundle.root),
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{LibraryBuilder, IMAGE_TYPE};
    use crate::project::{BundleOptions, CustomCodec};

    fn image(uuid: &str, preset: Option<&str>, codec: Option<&str>) -> Asset {
        let mut asset = Asset::new(uuid, IMAGE_TYPE)
            .with_url(format!("db://assets/main/{}.png", uuid))
            .with_files(&[".json", ".png"]);
        asset.user_data.compress_preset = preset.map(String::from);
        asset.user_data.custom_codec = codec.map(String::from);
        asset
    }

    fn config(yaml: &str) -> ProjectConfig {
        ProjectConfig::parse(yaml).unwrap()
    }

    #[test]
    fn test_duplicate_bundles() {
        let mut config = ProjectConfig::default();
        config.bundles = vec![
            BundleOptions::new("main", "db://assets/main"),
            BundleOptions::new("main", "db://assets/other"),
        ];
        assert!(check_duplicate_bundles(&config).has_errors());
    }

    #[test]
    fn test_overlapping_roots() {
        let mut config = ProjectConfig::default();
        config.bundles = vec![
            BundleOptions::new("levels", "db://assets/main/levels"),
            BundleOptions::new("main", "db://assets/main/"),
            BundleOptions::new("ui", "db://assets/ui"),
        ];
        let result = check_overlapping_roots(&config);
        assert_eq!(result.warning_count(), 1);
        assert!(result.iter().next().unwrap().message.starts_with("Bundle 'levels'"));
    }

    #[test]
    fn test_unknown_preset_is_error() {
        let mut builder = LibraryBuilder::new();
        builder.add(image("a", Some("missing"), None));
        let result = check_texture_presets(&ProjectConfig::default(), &builder.build());
        assert!(result.has_errors());
    }

    #[test]
    fn test_preset_without_platform_warns_once() {
        let config = config("platform: ios\ntexture_presets:\n  default:\n    android:\n      - format: etc1\n");
        let mut builder = LibraryBuilder::new();
        builder
            .add(image("a", Some("default"), None))
            .add(image("b", Some("default"), None));
        let result = check_texture_presets(&config, &builder.build());
        assert!(!result.has_errors());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_unmapped_format_warns() {
        let config = config("texture_presets:\n  default:\n    web-mobile:\n      - format: dxt5\n");
        let result = check_texture_presets(&config, &LibraryBuilder::new().build());
        assert_eq!(result.with_code("bundlekit::validate::unknown-format").count(), 1);
    }

    #[test]
    fn test_formats_sharing_an_extension_warn() {
        let config = config(
            "texture_presets:\n  default:\n    android:\n      - format: etc1_rgb\n      - format: etc2_rgba\n      - format: astc_6x6\n    ios:\n      - format: etc1_rgb\n",
        );
        let result = check_texture_presets(&config, &LibraryBuilder::new().build());
        let shared: Vec<_> = result.with_code("bundlekit::validate::shared-extension").collect();
        assert_eq!(shared.len(), 1);
        assert!(shared[0].message.contains("'etc1_rgb' and 'etc2_rgba'"));
    }

    #[test]
    fn test_custom_codecs() {
        let mut config = ProjectConfig::default();
        config.custom_codecs = vec![CustomCodec {
            name: "quant".to_string(),
            program: "pngquant".to_string(),
            args: vec!["{src}".to_string(), "{name}".to_string()],
        }];
        let mut builder = LibraryBuilder::new();
        builder
            .add(image("a", None, Some("quant")))
            .add(image("b", None, Some("nope")));

        let result = check_custom_codecs(&config, &builder.build());
        assert_eq!(result.with_code("bundlekit::validate::codec-template").count(), 1);
        assert_eq!(result.with_code("bundlekit::validate::unknown-codec").count(), 1);
    }

    #[test]
    fn test_missing_dependencies_include_sub_assets() {
        let mut builder = LibraryBuilder::new();
        builder.add(
            Asset::new("a", "cc.Prefab")
                .with_depends(&["gone"])
                .with_sub_asset(Asset::new("a@x", "cc.SpriteFrame").with_depends(&["a", "lost"])),
        );
        let result = check_missing_dependencies(&builder.build());
        assert_eq!(result.warning_count(), 2);
    }

    #[test]
    fn test_duplicate_urls() {
        let mut builder = LibraryBuilder::new();
        builder
            .add(Asset::new("a", "cc.Prefab").with_url("db://assets/main/hero.prefab"))
            .add(Asset::new("b", "cc.Prefab").with_url("db://assets/main/hero.prefab"))
            .add(Asset::new("c", "cc.Material").with_url("db://assets/main/hero.prefab"));
        let result = check_duplicate_urls(&builder.build());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_empty_bundles() {
        let mut config = ProjectConfig::default();
        config.bundles = vec![
            BundleOptions::new("main", "db://assets/main"),
            BundleOptions::new("empty", "db://assets/empty"),
        ];
        let mut builder = LibraryBuilder::new();
        builder.add(image("a", None, None));
        let result = check_empty_bundles(&config, &builder.build());
        assert_eq!(result.warning_count(), 1);
    }
}
