mod capping;
mod concurrency;
mod handles;
mod iteration;
mod persistence;
mod recovery;
mod workload;
