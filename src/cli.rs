use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "remzip")]
#[command(version)]
#[command(about = "List, read and append to ZIP archives over HTTP or local files", long_about = None)]
#[command(after_help = "Examples:\n  \
  remzip -l https://example.com/archive.zip    list files from a remote ZIP\n  \
  remzip -v data.zip                           list verbosely\n  \
  remzip -p data.zip notes.txt | less          print a member via pipe\n  \
  remzip -a report.pdf data.zip                append a file as a new member")]
pub struct Cli {
    /// ZIP archive path or HTTP URL
    #[arg(value_name = "ARCHIVE")]
    pub target: String,

    /// Members to print with -p
    #[arg(value_name = "MEMBERS")]
    pub members: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Print members to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Append a local file as a new member
    #[arg(short = 'a', value_name = "FILE")]
    pub append: Option<String>,

    /// Member name for -a (default: the file's basename)
    #[arg(long = "as", value_name = "NAME")]
    pub member_name: Option<String>,

    /// Quiet mode
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.target.starts_with("http://") || self.target.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }
}
