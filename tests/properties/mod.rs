mod envelope;
mod logging;
mod retry;
