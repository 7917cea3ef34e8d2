mod attach;
mod shutdown;
