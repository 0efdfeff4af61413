//! Lists the invariant checks the oracle knows.

use culprit_sim::InvariantOracle;

pub fn run() {
    let oracle = InvariantOracle::standard();
    println!("Invariant checks:");
    for name in oracle.names() {
        println!("  {name}");
    }
}
