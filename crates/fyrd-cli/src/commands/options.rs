//! Options command implementation.

use console::style;

use fyrd_sched::OptionTable;
use fyrd_sched::options::option_help;

/// Execute the options command.
pub fn execute(function: bool) {
    let table = if function {
        OptionTable::Function
    } else {
        OptionTable::Job
    };
    println!("{} Options for {} jobs:\n", style("→").cyan().bold(), table);
    print!("{}", option_help(table));
}
