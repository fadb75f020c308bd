use clap::{Parser, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::archive::{OpenOptions, Source};
use crate::error::Result;
use crate::split::{CollisionPolicy, NamingTemplate, SplitJob};
use crate::zip::CompressionMethod;

#[derive(Parser, Debug)]
#[command(name = "cbsplit")]
#[command(version)]
#[command(about = "Split CBZ/CBR comic archives into smaller CBZ parts", long_about = None)]
#[command(after_help = "Examples:\n  \
  cbsplit Saga.cbz                       split into Saga-part1.cbz and Saga-part2.cbz\n  \
  cbsplit Saga.cbr -n 4 -d parts         four parts in ./parts (needs unrar)\n  \
  cbsplit Saga.cbz -t '{name} {n} of {total}'\n  \
  cbsplit -l https://example.com/Saga.cbz -n 3   show the plan for a remote comic")]
pub struct Cli {
    /// Comic archive path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Number of parts to split into
    #[arg(short = 'n', long = "parts", value_name = "N", default_value_t = crate::split::DEFAULT_PARTS, value_parser = parse_parts)]
    pub parts: usize,

    /// Directory for the parts (default: next to FILE)
    #[arg(short = 'd', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Naming template; {n}, {total} and {name} are replaced (default: FILE's name)
    #[arg(short = 't', long = "template", value_name = "TEMPLATE")]
    pub template: Option<String>,

    /// Overwrite existing parts instead of failing
    #[arg(short = 'o', long)]
    pub overwrite: bool,

    /// Compression for the parts
    #[arg(short = 'z', long, value_enum, default_value_t = OutputCompression::Stored)]
    pub compression: OutputCompression,

    /// Junk paths (store pages without their directories)
    #[arg(short = 'j', long)]
    pub flatten: bool,

    /// List pages and the split plan without writing anything
    #[arg(short = 'l', long)]
    pub list: bool,

    /// unrar program used for CBR files
    #[arg(long, value_name = "PATH", env = "CBSPLIT_UNRAR", default_value = "unrar")]
    pub unrar: OsString,

    /// Quiet mode (no progress bar or summary)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Enable debug logging (use RUST_LOG for finer control)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn parse_parts(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        Ok(_) => Err("must be at least 1".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCompression {
    /// Store pages as-is (comic images are already compressed)
    Stored,
    /// DEFLATE pages that shrink under it
    Deflate,
}

impl From<OutputCompression> for CompressionMethod {
    fn from(value: OutputCompression) -> Self {
        match value {
            OutputCompression::Stored => CompressionMethod::Stored,
            OutputCompression::Deflate => CompressionMethod::Deflate,
        }
    }
}

impl Cli {
    pub fn source(&self) -> Source {
        Source::parse(&self.file)
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            unrar: self.unrar.clone(),
        }
    }

    /// Build the split job described by the arguments.
    pub fn job(&self) -> Result<SplitJob> {
        let source = self.source();
        let output_dir = match (&self.output_dir, source.parent_dir()) {
            (Some(dir), _) => dir.clone(),
            (None, Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut job = SplitJob::new(source, output_dir)
            .with_parts(self.parts)
            .with_compression(self.compression.into())
            .with_flatten(self.flatten)
            .with_collision(if self.overwrite {
                CollisionPolicy::Overwrite
            } else {
                CollisionPolicy::Fail
            });
        if let Some(template) = &self.template {
            job = job.with_template(NamingTemplate::parse(template)?);
        }
        Ok(job)
    }
}
