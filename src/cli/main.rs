//! Enrich a CSV of points with boundary features from a local data package.
//!
//! Writes `enriched_<input name>` next to the input file.

mod config;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use geoenrich::models::BoundaryType;
use geoenrich::package::{
    read_table_with_text, write_table, GeomType, LocalDataPackage, PackageConfig,
};
use geoenrich::quadkey::MAX_ZOOM;
use geoenrich::resolve::RankingRule;
use geoenrich::{EnrichEngine, EnrichRequest};

use crate::config::{Config, EnrichConfig};

const DEFAULT_LATITUDE_COL: &str = "latitude";
const DEFAULT_LONGITUDE_COL: &str = "longitude";

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "enrich")]
#[command(about = "Attach boundary features to point data")]
struct Args {
    /// CSV file of points to enrich
    #[arg(short, long)]
    file: PathBuf,

    /// TOML config with [package] and [enrich] sections
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding boundary packages
    #[arg(long)]
    base_loc: Option<PathBuf>,

    /// Package version
    #[arg(long)]
    version_id: Option<String>,

    /// File prefix of the quadkey crosswalk
    #[arg(long)]
    crosswalk_prefix: Option<String>,

    /// File prefix of the boundary tables
    #[arg(long)]
    data_prefix: Option<String>,

    /// Geometry representation of the package (wkt or json)
    #[arg(long)]
    geom_type: Option<GeomType>,

    /// Latitude column [default: latitude]
    #[arg(long)]
    latitude_col: Option<String>,

    /// Longitude column [default: longitude]
    #[arg(long)]
    longitude_col: Option<String>,

    /// Column of boundary identifiers; enables identifier mode
    #[arg(long)]
    id_column: Option<String>,

    /// Boundary type of --id-column
    #[arg(long, value_parser = parse_boundary)]
    id_boundary: Option<BoundaryType>,

    /// Boundary types to load, comma separated
    #[arg(long, value_delimiter = ',')]
    boundaries: Vec<String>,

    /// Features to load, comma separated (e.g. population_cbg)
    #[arg(long, value_delimiter = ',')]
    features: Vec<String>,

    /// How to pick among overlapping boundaries
    #[arg(long)]
    rule: Option<RankingRule>,

    /// Quadkey zoom level used for the crosswalk join
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=MAX_ZOOM as i64))]
    zoom: Option<u8>,

    /// Input column to use as the row index
    #[arg(long)]
    index_col: Option<String>,

    /// Keep each point's quadkey in a `qk` column
    #[arg(long)]
    keep_quadkey: bool,
}

fn parse_boundary(name: &str) -> std::result::Result<BoundaryType, String> {
    BoundaryType::from_name(name).ok_or_else(|| format!("unknown boundary type '{}'", name))
}

/// Package location from flags, falling back to the config file
fn package_config(args: &Args, from_file: Option<PackageConfig>) -> Result<PackageConfig> {
    let mut package = match from_file {
        Some(package) => package,
        None => {
            let (Some(base_loc), Some(version_id), Some(crosswalk_prefix)) =
                (&args.base_loc, &args.version_id, &args.crosswalk_prefix)
            else {
                bail!(
                    "--base-loc, --version-id and --crosswalk-prefix are required without --config"
                );
            };
            PackageConfig::new(base_loc, version_id, crosswalk_prefix)
        }
    };
    if let Some(base_loc) = &args.base_loc {
        package.base_loc = base_loc.clone();
    }
    if let Some(version_id) = &args.version_id {
        package.version_id = version_id.clone();
    }
    if let Some(prefix) = &args.crosswalk_prefix {
        package.crosswalk_prefix = prefix.clone();
    }
    if let Some(prefix) = &args.data_prefix {
        package.data_prefix = prefix.clone();
    }
    if let Some(geom_type) = args.geom_type {
        package.geom_type = geom_type;
    }
    Ok(package)
}

fn output_path(input: &Path) -> Result<PathBuf> {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .context("Input path has no file name")?;
    Ok(input.with_file_name(format!("enriched_{}", name)))
}

/// Request from flags, falling back to the config file
fn build_request(args: &Args, settings: &EnrichConfig) -> Result<EnrichRequest> {
    let id_column = args.id_column.as_ref().or(settings.id_column.as_ref());
    let id_boundary = args.id_boundary.or(settings.id_boundary);
    let mut request = match (id_column, id_boundary) {
        (Some(column), Some(boundary)) => EnrichRequest::identifier(boundary, column),
        (Some(_), None) | (None, Some(_)) => {
            bail!("--id-column and --id-boundary must be given together");
        }
        (None, None) => {
            let latitude = args
                .latitude_col
                .as_deref()
                .or(settings.latitude_col.as_deref())
                .unwrap_or(DEFAULT_LATITUDE_COL);
            let longitude = args
                .longitude_col
                .as_deref()
                .or(settings.longitude_col.as_deref())
                .unwrap_or(DEFAULT_LONGITUDE_COL);
            EnrichRequest::coordinates(latitude, longitude)
        }
    };
    if let Some(rule) = args.rule.or(settings.rule) {
        request = request.with_rule(rule);
    }
    if let Some(zoom) = args.zoom.or(settings.zoom) {
        request = request.with_zoom(zoom);
    }
    if args.keep_quadkey || settings.keep_quadkey {
        request = request.with_quadkey_column();
    }
    Ok(request)
}

/// Enrich the input file and return the path of the written output
fn run(args: &Args) -> Result<PathBuf> {
    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    let package = package_config(args, config.package)?;
    let settings = config.enrich;
    let request = build_request(args, &settings)?;

    // raw identifier codes keep their leading zeros
    let text_columns: Vec<&str> = request
        .identifier
        .iter()
        .map(|id| id.column.as_str())
        .collect();
    let mut points = read_table_with_text(&args.file, &text_columns)
        .with_context(|| format!("Failed to read points from {}", args.file.display()))?;
    if let Some(column) = args.index_col.as_ref().or(settings.index_col.as_ref()) {
        if !points.set_index(column) {
            bail!("Index column '{}' not found in input", column);
        }
    }
    info!("Read {} points", points.len());

    let mut engine = EnrichEngine::new(LocalDataPackage::new(package));

    let boundaries = if args.boundaries.is_empty() {
        &settings.boundaries
    } else {
        &args.boundaries
    };
    let features = if args.features.is_empty() {
        &settings.features
    } else {
        &args.features
    };
    if !boundaries.is_empty() || !features.is_empty() {
        engine
            .load(boundaries, features)
            .context("Failed to load boundary data")?;
    }

    let enriched = engine.enrich(&points, &request).context("Enrichment failed")?;

    let output = output_path(&args.file)?;
    write_table(&output, &enriched)?;
    info!(
        "Wrote {} rows x {} columns to {}",
        enriched.len(),
        enriched.fields().len(),
        output.display()
    );
    Ok(output)
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Boundary enrichment");
    info!("File: {}", args.file.display());

    run(&args)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoenrich::quadkey;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path(Path::new("/tmp/points.csv")).unwrap(),
            PathBuf::from("/tmp/enriched_points.csv")
        );
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::parse_from([
            "enrich",
            "--file",
            "points.csv",
            "--version-id",
            "v3",
            "--boundaries",
            "cbg,county",
        ]);
        assert_eq!(args.boundaries, vec!["cbg", "county"]);

        let from_file = PackageConfig::new("/data", "v2", "quadkeys");
        let package = package_config(&args, Some(from_file)).unwrap();
        assert_eq!(package.version_id, "v3");
        assert_eq!(package.base_loc, PathBuf::from("/data"));
    }

    #[test]
    fn test_package_flags_required_without_config() {
        let args = Args::parse_from(["enrich", "--file", "points.csv"]);
        assert!(package_config(&args, None).is_err());
    }

    /// Package with one county and a crosswalk entry for a point in Pinellas
    fn package_dir(dir: &TempDir) -> PackageConfig {
        let config = PackageConfig::new(dir.path(), "v2", "quadkeys");
        fs::create_dir_all(config.data_loc()).unwrap();
        fs::write(
            config.boundary_loc(BoundaryType::County),
            "id,name,population,coast_intersects\n12103,Pinellas,959107,true\n",
        )
        .unwrap();
        fs::write(
            config.boundary_loc(BoundaryType::Cbg),
            "id,population\n060372073011,812\n",
        )
        .unwrap();
        let key = quadkey::from_geo(27.848180, -82.729481, quadkey::DEFAULT_ZOOM).unwrap();
        fs::write(
            config.crosswalk_loc(),
            format!("id,county_id,cbg_id\n{},12103,060372073011\n", key),
        )
        .unwrap();
        config
    }

    fn package_args(dir: &TempDir, file: &Path, extra: &[&str]) -> Args {
        let base = dir.path().to_str().unwrap();
        let mut argv = vec![
            "enrich",
            "--file",
            file.to_str().unwrap(),
            "--base-loc",
            base,
            "--version-id",
            "v2",
            "--crosswalk-prefix",
            "quadkeys",
        ];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_coordinate_columns_default() {
        let args = Args::parse_from(["enrich", "--file", "points.csv"]);
        let request = build_request(&args, &EnrichConfig::default()).unwrap();
        assert_eq!(request.latitude_column.as_deref(), Some("latitude"));
        assert_eq!(request.longitude_column.as_deref(), Some("longitude"));
        assert!(!request.keep_quadkey);

        let settings = EnrichConfig {
            latitude_col: Some("lat".to_string()),
            ..EnrichConfig::default()
        };
        let args = Args::parse_from(["enrich", "--file", "p.csv", "--longitude-col", "lng"]);
        let request = build_request(&args, &settings).unwrap();
        assert_eq!(request.latitude_column.as_deref(), Some("lat"));
        assert_eq!(request.longitude_column.as_deref(), Some("lng"));
    }

    #[test]
    fn test_identifier_flags_must_pair() {
        let args = Args::parse_from(["enrich", "--file", "p.csv", "--id-column", "cbg"]);
        assert!(build_request(&args, &EnrichConfig::default()).is_err());
    }

    #[test]
    fn test_run_with_default_coordinate_columns() {
        let dir = TempDir::new().unwrap();
        package_dir(&dir);
        let file = dir.path().join("points.csv");
        fs::write(&file, "latitude,longitude\n27.848180,-82.729481\n28.5,-81.3\n").unwrap();

        let args = package_args(&dir, &file, &["--boundaries", "county"]);
        let output = run(&args).unwrap();

        assert_eq!(output, dir.path().join("enriched_points.csv"));
        let written = fs::read_to_string(output).unwrap();
        assert_eq!(
            written,
            ",latitude,longitude,population_county,coast_intersects_county\n\
             0,27.84818,-82.729481,959107,1.0\n\
             1,28.5,-81.3,,\n"
        );
    }

    #[test]
    fn test_run_identifier_keeps_leading_zeros() {
        let dir = TempDir::new().unwrap();
        package_dir(&dir);
        let file = dir.path().join("codes.csv");
        fs::write(&file, "row,cbg\n5,060372073011\n").unwrap();

        let args = package_args(
            &dir,
            &file,
            &["--id-column", "cbg", "--id-boundary", "cbg", "--index-col", "row"],
        );
        let written = fs::read_to_string(run(&args).unwrap()).unwrap();
        assert_eq!(written, "row,cbg,population_cbg\n5,060372073011,812\n");
    }

    #[test]
    fn test_parse_boundary() {
        assert_eq!(parse_boundary("cbg"), Ok(BoundaryType::Cbg));
        assert!(parse_boundary("state").is_err());
    }
}
