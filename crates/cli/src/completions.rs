use clap::CommandFactory;
use clap_complete::Shell;
use std::io::Write;

use crate::args::Cli;

pub fn generate<W: Write>(shell: Shell, out: &mut W) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "hitl", out);
}
