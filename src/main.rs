use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(version, author, about = "a coordination hub for a pool of cooperating processes")]
struct Args {
    #[clap(short, long, action, help = "path to a hub config file (defaults: ~/.swhubrc, /etc/seawolf_hub.conf)")]
    config_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    seawolf_hub::run(args.config_file.as_deref())
}
