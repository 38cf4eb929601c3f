mod support;

mod map_reduce_index;
mod persistence;
mod rebuild;
mod validation;
