#[cfg(any(feature = "gpu", feature = "metal"))]
mod gpu_error {
	use std::fmt::Display;

	#[cfg(feature = "gpu")]
	use vulkano::{self, LoadingError, ValidationError, Validated, memory::allocator::MemoryAllocatorError, buffer::AllocateBufferError, command_buffer::CommandBufferExecError, image::AllocateImageError};

	/// Errors from a GPU backend. Named `GpuError` rather than e.g. `VulkanError` (as in the
	/// source this crate is descended from) since it now also carries Metal's failure modes
	#[derive(Debug)]
	pub enum GpuError {
		#[cfg(feature = "gpu")]
		VulkanLoadError(LoadingError),
		#[cfg(feature = "gpu")]
		VulkanError(vulkano::VulkanError),
		#[cfg(feature = "gpu")]
		VulkanValidationError(Box<ValidationError>),
		#[cfg(feature = "gpu")]
		VulkanMallocError(MemoryAllocatorError),
		#[cfg(feature = "gpu")]
		VulkanCmdExecError(CommandBufferExecError),
		#[cfg(feature = "gpu")]
		VulkanAllocImageError(AllocateImageError),
		#[cfg(feature = "metal")]
		MetalError(String),
		NoSuitableDevice,
		DispatchTimedOut
	}

	impl Display for GpuError {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			write!(f, "{}", match self {
				#[cfg(feature = "gpu")]
				GpuError::VulkanLoadError(e) => e.to_string(),
				#[cfg(feature = "gpu")]
				GpuError::VulkanError(e) => e.to_string(),
				#[cfg(feature = "gpu")]
				GpuError::VulkanValidationError(e) => e.to_string(),
				#[cfg(feature = "gpu")]
				GpuError::VulkanMallocError(e) => e.to_string(),
				#[cfg(feature = "gpu")]
				GpuError::VulkanCmdExecError(e) => e.to_string(),
				#[cfg(feature = "gpu")]
				GpuError::VulkanAllocImageError(e) => e.to_string(),
				#[cfg(feature = "metal")]
				GpuError::MetalError(msg) => msg.clone(),
				GpuError::NoSuitableDevice => "No appropriate GPU implementation found on the system".to_string(),
				GpuError::DispatchTimedOut => "Timed out waiting for GPU dispatch to complete".to_string(),
			})
		}
	}

	macro_rules! impl_from_for_variant {
		($variant: path, $contained_type: ty) => {
			impl From<$contained_type> for GpuError {
				fn from(value: $contained_type) -> Self {
					$variant(value)
				}
			}
		};
	}

	#[cfg(feature = "gpu")]
	impl_from_for_variant!(GpuError::VulkanError, vulkano::VulkanError);
	#[cfg(feature = "gpu")]
	impl_from_for_variant!(GpuError::VulkanLoadError, LoadingError);
	#[cfg(feature = "gpu")]
	impl_from_for_variant!(GpuError::VulkanValidationError, Box<ValidationError>);
	#[cfg(feature = "gpu")]
	impl_from_for_variant!(GpuError::VulkanMallocError, MemoryAllocatorError);
	#[cfg(feature = "gpu")]
	impl_from_for_variant!(GpuError::VulkanCmdExecError, CommandBufferExecError);
	#[cfg(feature = "gpu")]
	impl_from_for_variant!(GpuError::VulkanAllocImageError, AllocateImageError);

	#[cfg(feature = "gpu")]
	impl<T> From<Validated<T>> for GpuError where T: Into<GpuError> {
		fn from(value: Validated<T>) -> Self {
			match value { Validated::Error(e) => e.into(), Validated::ValidationError(ve) => GpuError::from(ve) }
		}
	}

	#[cfg(feature = "gpu")]
	impl From<AllocateBufferError> for GpuError {
		fn from(value: AllocateBufferError) -> Self {
			match value {
				AllocateBufferError::AllocateMemory(mae) => GpuError::from(mae),
				AllocateBufferError::BindMemory(vke) => GpuError::from(vke),
				AllocateBufferError::CreateBuffer(vke) => GpuError::from(vke)
			}
		}
	}
}

use std::{fmt::Display, io};

#[cfg(any(feature = "gpu", feature = "metal"))]
pub use self::gpu_error::GpuError;

macro_rules! impl_from_for_variant {
	($variant: path, $contained_type: ty) => {
		impl From<$contained_type> for Error {
			fn from(value: $contained_type) -> Self {
				$variant(value)
			}
		}
	};
}

/// Errors surfaced by the matching core: pattern compilation, a GPU dispatch, or I/O while reading
/// a batch of paths. Usage errors belonging to argument parsing live in the `findgpu` binary crate,
/// since the library itself has no notion of a command line
#[derive(Debug)]
pub enum Error {
	#[cfg(any(feature = "gpu", feature = "metal"))]
	GpuError(GpuError),
	IoError(io::Error),
	InvalidGlobPattern(String),
	InvalidRegexPattern(String),
	RegexTooComplex { num_states: usize, max_states: usize }
}

impl Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", match self {
			#[cfg(any(feature = "gpu", feature = "metal"))]
			Error::GpuError(e) => e.to_string(),
			Error::IoError(e) => e.to_string(),
			Error::InvalidGlobPattern(msg) => format!("invalid glob pattern: {msg}"),
			Error::InvalidRegexPattern(msg) => format!("invalid regex pattern: {msg}"),
			Error::RegexTooComplex { num_states, max_states } => format!("regex compiles to {num_states} states, which exceeds the limit of {max_states}")
		})
	}
}

impl std::error::Error for Error {}

impl_from_for_variant!(Error::IoError, io::Error);

#[cfg(any(feature = "gpu", feature = "metal"))]
impl<T> From<T> for Error where T: Into<GpuError> {
	fn from(value: T) -> Self {
		Error::GpuError(value.into())
	}
}
