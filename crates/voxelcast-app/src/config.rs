//! Run configuration: TOML file plus command-line overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use voxelcast_core::{Error, GridExtent, Result};

/// Config file read from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "voxelcast.toml";

/// What to do when one iteration of the scale sweep fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationPolicy {
    /// Log the failure and continue with the next scale.
    #[default]
    Skip,
    /// Stop the run.
    Abort,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Also write logs to rotating files.
    pub file_output: bool,
    pub directory: PathBuf,
    /// Number of rotated files to keep.
    pub max_files: usize,
    /// Files older than this are deleted at startup.
    pub max_age_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_output: !cfg!(debug_assertions),
            directory: PathBuf::from("logs"),
            max_files: 5,
            max_age_days: 15,
        }
    }
}

/// Everything a run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub app_name: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Shader name, loaded from `shaders/spv/<shader>.spv`.
    pub shader: String,
    pub mesh: PathBuf,
    /// Output path pattern; `{}` becomes the two-digit iteration number.
    pub output: String,
    /// One iteration per scale, in order.
    pub scales: Vec<f32>,
    pub validation: bool,
    pub on_iteration_error: IterationPolicy,
    pub logging: LoggingConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        let extent = GridExtent::default();
        Self {
            app_name: "voxelcast".to_string(),
            width: extent.width,
            height: extent.height,
            depth: extent.depth,
            shader: "voxelize".to_string(),
            mesh: PathBuf::from("model.obj"),
            output: "output_{}.png".to_string(),
            scales: (1..=10).map(|i| i as f32 * 0.1).collect(),
            validation: cfg!(debug_assertions),
            on_iteration_error: IterationPolicy::Skip,
            logging: LoggingConfig::default(),
        }
    }
}

impl RunConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&contents).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn extent(&self) -> GridExtent {
        GridExtent::new(self.width, self.height, self.depth)
    }

    /// Reject configurations that cannot produce a run.
    pub fn validate(&self) -> Result<()> {
        self.extent().validate()?;

        if self.scales.is_empty() {
            return Err(Error::Config("scales must not be empty".to_string()));
        }
        if let Some(bad) = self.scales.iter().find(|s| !s.is_finite()) {
            return Err(Error::Config(format!("scale {bad} is not finite")));
        }
        if self.output.is_empty() {
            return Err(Error::Config("output pattern must not be empty".to_string()));
        }

        Ok(())
    }

    /// Apply parsed command-line overrides.
    pub fn apply(&mut self, args: &CliArgs) {
        if let Some(output) = &args.output {
            self.output.clone_from(output);
        }
        if let Some(mesh) = &args.mesh {
            self.mesh.clone_from(mesh);
        }
        if let Some(shader) = &args.shader {
            self.shader.clone_from(shader);
        }
        if let Some(extent) = args.extent {
            self.width = extent.width;
            self.height = extent.height;
            self.depth = extent.depth;
        }
        if let Some(scales) = &args.scales {
            self.scales.clone_from(scales);
        }
        if let Some(validation) = args.validation {
            self.validation = validation;
        }
        if args.abort_on_error {
            self.on_iteration_error = IterationPolicy::Abort;
        }
    }

    /// Resolve the configuration for a command line.
    ///
    /// An explicit `--config` file must exist; otherwise `voxelcast.toml` is
    /// read if present and defaults are used if not.
    pub fn resolve(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };

        config.apply(args);
        config.validate()?;
        Ok(config)
    }
}

/// Command-line arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub output: Option<String>,
    pub mesh: Option<PathBuf>,
    pub shader: Option<String>,
    pub extent: Option<GridExtent>,
    pub scales: Option<Vec<f32>>,
    pub validation: Option<bool>,
    pub abort_on_error: bool,
    pub help: bool,
}

impl CliArgs {
    /// Parse from the process arguments.
    pub fn from_args() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        Self::parse_args(&args)
    }

    /// Parse from a slice of arguments; `args[0]` is the program name.
    ///
    /// Recognizes the following flags:
    /// - `-c` or `--config <PATH>`: TOML config file
    /// - `-o` or `--output <PATTERN>`: Output path pattern (use `{}` for the iteration)
    /// - `-m` or `--mesh <PATH>`: OBJ mesh
    /// - `-s` or `--shader <NAME>`: Shader name under `shaders/spv/`
    /// - `--extent <WxHxD>`: Voxel grid size
    /// - `--scales <a,b,c>`: Scale sweep
    /// - `--validation` / `--no-validation`: Vulkan validation layers
    /// - `--abort-on-error`: Stop at the first failed iteration
    /// - `-h` or `--help`
    pub fn parse_args(args: &[String]) -> Result<Self> {
        let mut cli = Self::default();

        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            let mut value = || {
                iter.next()
                    .cloned()
                    .ok_or_else(|| Error::Config(format!("{arg} needs a value")))
            };

            match arg.as_str() {
                "-c" | "--config" => cli.config = Some(PathBuf::from(value()?)),
                "-o" | "--output" => cli.output = Some(value()?),
                "-m" | "--mesh" => cli.mesh = Some(PathBuf::from(value()?)),
                "-s" | "--shader" => cli.shader = Some(value()?),
                "--extent" => cli.extent = Some(value()?.parse()?),
                "--scales" => cli.scales = Some(parse_scales(&value()?)?),
                "--validation" => cli.validation = Some(true),
                "--no-validation" => cli.validation = Some(false),
                "--abort-on-error" => cli.abort_on_error = true,
                "-h" | "--help" => cli.help = true,
                other => return Err(Error::Config(format!("Unknown argument: {other}"))),
            }
        }

        Ok(cli)
    }
}

/// Parse a comma-separated scale list like "0.5,1,1.5".
pub fn parse_scales(s: &str) -> Result<Vec<f32>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f32>()
                .map_err(|e| Error::Config(format!("Invalid scale {part:?}: {e}")))
        })
        .collect()
}

/// Usage text printed for `--help`.
pub const USAGE: &str = "\
Usage: voxelcast [OPTIONS]

Voxelizes an OBJ mesh on the GPU once per scale and writes each voxel grid
as a PNG atlas of its height slices.

Options:
  -c, --config <PATH>     TOML config file (default: ./voxelcast.toml if present)
  -o, --output <PATTERN>  Output path pattern, {} is the iteration (default: output_{}.png)
  -m, --mesh <PATH>       OBJ mesh (default: model.obj)
  -s, --shader <NAME>     Shader loaded from shaders/spv/<NAME>.spv (default: voxelize)
      --extent <WxHxD>    Voxel grid size (default: 128x64x128)
      --scales <a,b,..>   Scale sweep (default: 0.1,0.2,...,1.0)
      --validation        Enable Vulkan validation layers
      --no-validation     Disable Vulkan validation layers
      --abort-on-error    Stop at the first failed iteration
  -h, --help              Print this help

RUST_LOG overrides the configured log filter.";

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("voxelcast")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_match_reference_run() {
        let config = RunConfig::default();
        assert_eq!(config.extent(), GridExtent::new(128, 64, 128));
        assert_eq!(config.scales.len(), 10);
        assert_relative_eq!(config.scales[0], 0.1);
        assert_relative_eq!(config.scales[9], 1.0);
        assert_eq!(config.on_iteration_error, IterationPolicy::Skip);
        assert_eq!(config.logging.max_files, 5);
        assert_eq!(config.logging.max_age_days, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RunConfig::from_toml(
            r#"
            width = 32
            scales = [0.5]
            on_iteration_error = "abort"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.extent(), GridExtent::new(32, 64, 128));
        assert_eq!(config.scales, vec![0.5]);
        assert_eq!(config.on_iteration_error, IterationPolicy::Abort);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.directory, PathBuf::from("logs"));
        assert_eq!(config.mesh, PathBuf::from("model.obj"));
    }

    #[test]
    fn toml_round_trips() {
        let config = RunConfig::default();
        let parsed = RunConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        assert!(matches!(
            RunConfig::from_toml("width = \"wide\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn validation_rejects_empty_runs() {
        let mut config = RunConfig::default();
        config.scales.clear();
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.depth = 0;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.scales = vec![f32::NAN];
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_overrides_apply() {
        let cli = CliArgs::parse_args(&args(&[
            "-o",
            "out/{}.png",
            "--mesh",
            "bunny.obj",
            "--extent",
            "16x8x16",
            "--scales",
            "0.25, 0.5",
            "--no-validation",
            "--abort-on-error",
        ]))
        .unwrap();

        let mut config = RunConfig::default();
        config.apply(&cli);

        assert_eq!(config.output, "out/{}.png");
        assert_eq!(config.mesh, PathBuf::from("bunny.obj"));
        assert_eq!(config.extent(), GridExtent::new(16, 8, 16));
        assert_eq!(config.scales, vec![0.25, 0.5]);
        assert!(!config.validation);
        assert_eq!(config.on_iteration_error, IterationPolicy::Abort);
        assert_eq!(config.shader, "voxelize");
    }

    #[test]
    fn cli_errors() {
        assert!(CliArgs::parse_args(&args(&["--output"])).is_err());
        assert!(CliArgs::parse_args(&args(&["--extent", "16x8"])).is_err());
        assert!(CliArgs::parse_args(&args(&["--scales", "a,b"])).is_err());
        assert!(CliArgs::parse_args(&args(&["--frobnicate"])).is_err());
    }

    #[test]
    fn help_flag() {
        assert!(CliArgs::parse_args(&args(&["-h"])).unwrap().help);
        assert!(!CliArgs::parse_args(&args(&[])).unwrap().help);
    }

    #[test]
    fn explicit_config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "shader = \"custom\"\nscales = [1.0, 2.0]\n").unwrap();

        let cli = CliArgs {
            config: Some(path),
            scales: Some(vec![3.0]),
            ..CliArgs::default()
        };
        let config = RunConfig::resolve(&cli).unwrap();

        assert_eq!(config.shader, "custom");
        // Command line wins over the file
        assert_eq!(config.scales, vec![3.0]);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let cli = CliArgs {
            config: Some(PathBuf::from("does/not/exist.toml")),
            ..CliArgs::default()
        };
        assert!(matches!(RunConfig::resolve(&cli), Err(Error::Config(_))));
    }
}
