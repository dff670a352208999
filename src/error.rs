use thiserror::Error;

/// Errors that abort a run
#[derive(Debug, Error)]
pub enum BenchError {
	#[error("configuration error: {0}")]
	Config(String),

	#[error("no resolvers to test")]
	NoResolvers,

	#[error("all {0} resolvers were excluded by the truncation check")]
	AllExcluded(usize),

	#[error("failed to write output '{path}': {source}")]
	OutputSink {
		path: String,
		#[source]
		source: csv::Error,
	},

	#[error("failed to write report row: {0}")]
	Console(#[from] std::io::Error),

	#[error("pipeline task failed: {0}")]
	Pipeline(String),
}

impl BenchError {
	pub fn config<S: Into<String>>(message: S) -> Self {
		Self::Config(message.into())
	}
}
