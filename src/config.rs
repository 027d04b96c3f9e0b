use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "small-exchange", version, about = "A line-oriented TCP exchange server", long_about = None)]
pub struct Config {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 9090)]
    pub port: u16,
}
