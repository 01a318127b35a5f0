mod common;
mod reclaimer;
mod routing;
mod selection;
