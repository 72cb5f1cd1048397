//! afdo - inspect AutoFDO sample profiles
//!
//! # Usage
//!
//! ```bash
//! # Print the inlined call-tree forest
//! afdo dump fbdata.afdo
//!
//! # Same, as JSON
//! afdo dump --json fbdata.afdo
//!
//! # Sample totals and the hot count threshold
//! afdo summary fbdata.afdo
//!
//! # Auxiliary modules a primary module would import
//! afdo modules --config autofdo.toml src/main.c
//! ```

use autofdo::profile::{FunctionInstance, Profile};
use autofdo::{logging, read_profile_file, AutoFdoConfig, AutoProfile};
use clap::{Parser, Subcommand};
use diagnostics::{Diagnostics, ErrorFormatter};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "afdo")]
#[command(version = "0.1.0")]
#[command(about = "Inspect AutoFDO sample profiles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every function instance with its positions and inlined callees
    Dump {
        /// Profile file
        file: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print sample totals and working-set thresholds
    Summary {
        /// Profile file
        file: PathBuf,

        /// Working-set permille for the hot threshold
        #[arg(long, default_value = "999")]
        permille: u32,
    },
    /// Select the auxiliary modules of a primary module
    Modules {
        /// Primary module name as recorded in the profile
        primary: String,

        /// autofdo.toml; its profile-file is read unless --profile is given
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Profile file
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Maximum group size, primary included (0 = unlimited)
        #[arg(long)]
        max_group_size: Option<u32>,
    },
}

fn main() {
    logging::init_from_env();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Dump { file, json } => dump(&file, json),
        Commands::Summary { file, permille } => summary(&file, permille),
        Commands::Modules {
            primary,
            config,
            profile,
            max_group_size,
        } => modules(&primary, config, profile, max_group_size),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load(file: &Path) -> Result<Profile, String> {
    read_profile_file(file).map_err(|e| {
        let mut diags = Diagnostics::new();
        diags.push(e.to_diagnostic(file.display().to_string()));
        ErrorFormatter::new().format_diagnostics(&diags)
    })
}

fn dump(file: &Path, json: bool) -> Result<(), String> {
    let profile = load(file)?;
    if json {
        let text = serde_json::to_string_pretty(&profile.to_json())
            .map_err(|e| format!("Failed to serialize profile: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    for root in profile.source.roots() {
        print_instance(&profile, root, 0);
    }
    Ok(())
}

fn print_instance(profile: &Profile, instance: &FunctionInstance, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{}{} total:{} head:{}",
        indent,
        profile.instance_name(instance),
        instance.total_count(),
        instance.head_count()
    );
    for (key, info) in instance.positions() {
        let mut line = format!("{}  {}.{}: {}", indent, key >> 16, key & 0xffff, info.count);
        for (target, count) in &info.targets {
            let name = profile.strings.get_name(*target).unwrap_or("<unknown>");
            line.push_str(&format!(" {}:{}", name, count));
        }
        println!("{}", line);
    }
    for (key, callee) in instance.callsites() {
        println!("{}  {}.{}: inlined", indent, key >> 16, key & 0xffff);
        print_instance(profile, callee, depth + 2);
    }
}

fn summary(file: &Path, permille: u32) -> Result<(), String> {
    let profile = load(file)?;
    let s = &profile.summary;
    println!("functions:      {}", profile.source.len());
    println!("names:          {}", profile.strings.len());
    println!("modules:        {}", profile.modules.len());
    println!("sum_all:        {}", s.sum_all);
    println!("sum_max:        {}", s.sum_max);
    let ws = s.working_set_for(permille);
    println!(
        "hot threshold:  {} ({} counters at {} permille)",
        ws.min_counter, ws.num_counters, permille
    );
    Ok(())
}

fn modules(
    primary: &str,
    config: Option<PathBuf>,
    profile: Option<PathBuf>,
    max_group_size: Option<u32>,
) -> Result<(), String> {
    let mut config = match config {
        Some(path) => AutoFdoConfig::from_file(&path)?,
        None => AutoFdoConfig::default(),
    };
    if let Some(path) = profile {
        config = config.with_profile_file(path);
    }
    if let Some(size) = max_group_size {
        config.max_module_group_size = size;
    }
    config.dyn_ipa = true;
    config.validate()?;

    let autofdo = AutoProfile::new(load(&config.profile_file)?, config);
    let mut diags = Diagnostics::new();
    let group = autofdo
        .select_aux_modules(primary, &mut diags)
        .ok_or_else(|| format!("primary module {} is not in the profile", primary))?;

    println!("{} (ident {})", group.primary.name, group.primary.ident);
    for aux in &group.aux {
        println!("  {} (ident {})", aux.name, aux.ident);
    }
    if !diags.is_empty() {
        log::info!("{} modules rejected", diags.len());
        eprintln!("{}", ErrorFormatter::new().format_diagnostics(&diags));
    }
    Ok(())
}
