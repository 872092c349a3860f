use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::datasets::{DatasetSpec, InstallCheck, LoadedDataset, Registry};
use crate::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    // Output files were already present
    Skipped,
    // Every file that was written
    Prepared { files: Vec<PathBuf> },
}

// Whether a dataset's outputs already exist. Only existence is checked, a
// truncated file still counts as installed.
pub fn is_installed(config: &Config, spec: &DatasetSpec) -> bool {
    match spec.install_check {
        InstallCheck::Splits => spec
            .splits
            .iter()
            .all(|split| config.record_path(spec.name, split).exists()),
        InstallCheck::Folder(folder) => config.data_dir.join(spec.name).join(folder).exists(),
    }
}

// Prepare the requested datasets, or every registered one when `requested` is
// empty. Names that are not registered are ignored.
pub fn prepare(
    registry: &Registry,
    requested: &[String],
    config: &Config,
) -> Result<Vec<(&'static str, Outcome)>> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {:?}", config.data_dir))?;

    let mut report = Vec::new();
    for spec in registry.iter() {
        if !requested.is_empty() && !requested.iter().any(|name| name == spec.name) {
            continue;
        }
        if is_installed(config, spec) {
            info!("Skipping already installed: {}", spec.name);
            report.push((spec.name, Outcome::Skipped));
            continue;
        }

        info!("Preparing {}", spec.name);
        let now = Instant::now();
        let dataset = (spec.loader)(config).with_context(|| format!("failed to load {}", spec.name))?;
        let files = save(spec, &dataset, config)?;
        info!("Prepared {} [{}ms]", spec.name, now.elapsed().as_millis());
        report.push((spec.name, Outcome::Prepared { files }));
    }
    Ok(report)
}

// Write splits as record files and any readme or auxiliary files verbatim
fn save(spec: &DatasetSpec, dataset: &LoadedDataset, config: &Config) -> Result<Vec<PathBuf>> {
    let writer = spec.writer();
    let mut files = Vec::new();

    for (split_name, split) in &dataset.splits {
        let path = config.record_path(spec.name, split_name);
        writer(split, &path).with_context(|| format!("failed to write {:?}", path))?;
        files.push(path);
    }

    if let Some(readme) = &dataset.readme {
        let path = config.data_dir.join(format!("{}-readme.txt", spec.name));
        fs::write(&path, readme).with_context(|| format!("failed to write {:?}", path))?;
        files.push(path);
    }

    for file in &dataset.files {
        let path = config.data_dir.join(&file.filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("failed to create {:?}", parent))?;
        }
        fs::write(&path, &file.data).with_context(|| format!("failed to write {:?}", path))?;
        info!("Saved: {:?}", path);
        files.push(path);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::Split;

    fn noop_loader(_: &Config) -> Result<LoadedDataset> {
        Ok(LoadedDataset::new())
    }

    #[test]
    fn test_is_installed_needs_every_split() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let spec = DatasetSpec::new("toy", noop_loader, &["train", "test"]);
        assert!(!is_installed(&config, &spec));

        fs::write(config.record_path("toy", "train"), b"").unwrap();
        assert!(!is_installed(&config, &spec));

        fs::write(config.record_path("toy", "test"), b"").unwrap();
        assert!(is_installed(&config, &spec));
    }

    #[test]
    fn test_is_installed_folder() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let spec = DatasetSpec::new("toy", noop_loader, &["train"])
            .with_install_check(InstallCheck::Folder("images"));
        assert!(!is_installed(&config, &spec));
        fs::create_dir_all(dir.path().join("toy").join("images")).unwrap();
        assert!(is_installed(&config, &spec));
    }

    fn aux_loader(_: &Config) -> Result<LoadedDataset> {
        Ok(LoadedDataset::new()
            .with_split("train", Split::new(vec![vec![1, 2]], vec![5]).unwrap())
            .with_readme("about this dataset")
            .with_file("extra/folds.txt", b"0 1 2".to_vec()))
    }

    #[test]
    fn test_auxiliary_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("out"));
        let mut registry = Registry::new();
        registry.register(DatasetSpec::new("aux", aux_loader, &["train"]));

        let report = prepare(&registry, &[], &config).unwrap();
        let files = match &report[..] {
            [("aux", Outcome::Prepared { files })] => files.clone(),
            other => panic!("unexpected report {:?}", other),
        };
        assert_eq!(
            files,
            vec![
                config.record_path("aux", "train"),
                config.data_dir.join("aux-readme.txt"),
                config.data_dir.join("extra/folds.txt"),
            ]
        );
        assert_eq!(
            fs::read_to_string(config.data_dir.join("aux-readme.txt")).unwrap(),
            "about this dataset"
        );
        assert_eq!(fs::read(config.data_dir.join("extra/folds.txt")).unwrap(), b"0 1 2");
    }

    fn marker_writer(split: &Split, path: &std::path::Path) -> Result<()> {
        fs::write(path, format!("{} records", split.len()))?;
        Ok(())
    }

    #[test]
    fn test_writer_override() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let mut registry = Registry::new();
        registry.register(DatasetSpec::new("aux", aux_loader, &["train"]).with_writer(marker_writer));

        prepare(&registry, &["aux".to_string()], &config).unwrap();
        assert_eq!(
            fs::read_to_string(config.record_path("aux", "train")).unwrap(),
            "1 records"
        );
    }
}
