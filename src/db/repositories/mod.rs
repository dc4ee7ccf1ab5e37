mod app_usage;
mod sessions;
