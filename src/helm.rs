use crate::kubectl::run_command;
use crate::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

/// Options for a chart install. `set_values` is ordered so rendered
/// command lines are deterministic.
#[derive(Default, Clone, Debug)]
pub struct InstallOptions {
    pub namespace: Option<String>,
    pub create_namespace: bool,
    pub set_values: BTreeMap<String, String>,
    pub values_files: Vec<PathBuf>,
}

impl InstallOptions {
    pub fn in_namespace(namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            ..Self::default()
        }
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.set_values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn values_file(mut self, path: PathBuf) -> Self {
        self.values_files.push(path);
        self
    }
}

/// Argument list for `helm install`, kept pure for testing. A `None`
/// release asks helm to generate one.
pub fn install_args(release: Option<&str>, chart: &str, options: &InstallOptions) -> Vec<String> {
    let mut args = vec!["install".to_string()];
    match release {
        Some(release) => args.push(release.to_string()),
        None => args.push("--generate-name".to_string()),
    }
    args.push(chart.to_string());
    for (key, value) in &options.set_values {
        args.push("--set".to_string());
        args.push(format!("{key}={value}"));
    }
    for file in &options.values_files {
        args.push("-f".to_string());
        args.push(file.to_string_lossy().into_owned());
    }
    if let Some(namespace) = &options.namespace {
        args.push("-n".to_string());
        args.push(namespace.clone());
    }
    if options.create_namespace {
        args.push("--create-namespace".to_string());
    }
    args
}

pub struct Helm {}

impl Helm {
    pub async fn repo_add(name: &str, url: &str) -> Result<()> {
        run_command(
            "helm",
            &[
                "repo".to_string(),
                "add".to_string(),
                name.to_string(),
                url.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn repo_update() -> Result<()> {
        run_command("helm", &["repo".to_string(), "update".to_string()]).await?;
        Ok(())
    }

    /// Refresh a local chart's dependency archives before install.
    pub async fn dependency_update(chart_dir: &str) -> Result<()> {
        run_command(
            "helm",
            &[
                "dependency".to_string(),
                "update".to_string(),
                chart_dir.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn install(release: &str, chart: &str, options: &InstallOptions) -> Result<()> {
        info!("Installing release {} from chart {}", release, chart);
        run_command("helm", &install_args(Some(release), chart, options)).await?;
        Ok(())
    }

    /// Install with a helm-generated release name.
    pub async fn install_generated(chart: &str, options: &InstallOptions) -> Result<()> {
        info!("Installing generated release from chart {}", chart);
        run_command("helm", &install_args(None, chart, options)).await?;
        Ok(())
    }
}
