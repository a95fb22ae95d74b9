mod disabler;
mod helpers;
mod throughput;
