mod support;

mod concurrency;
mod lifecycle;
