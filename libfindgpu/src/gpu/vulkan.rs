//! Vulkan backend driver, grounded on the teacher's `search/pfac_gpu.rs`: the same device
//! selection, `StandardMemoryAllocator`, host-visible-buffer-then-copy, and fence-wait dispatch
//! pattern, generalized from a single Aho-Corasick table image to the glob/regex buffer-binding
//! convention in §4.3. Buffers are written as raw little-endian bytes (§9: "the host performs the
//! same packing explicitly to stay platform-agnostic") rather than through a derive-macro wire
//! struct, matching how the teacher writes its own table and input buffers.

mod shaders {
	pub mod glob {
		use vulkano_shaders::shader;

		shader! {
			ty: "compute",
			path: "shaders/glob_match.comp"
		}
	}

	pub mod regex {
		use vulkano_shaders::shader;

		shader! {
			ty: "compute",
			path: "shaders/regex_match.comp"
		}
	}
}

use std::ops::DerefMut;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use vulkano::buffer::{Buffer, BufferCreateInfo, BufferUsage, Subbuffer};
use vulkano::command_buffer::allocator::{StandardCommandBufferAllocator, StandardCommandBufferAllocatorCreateInfo};
use vulkano::command_buffer::{AutoCommandBufferBuilder, CommandBufferUsage};
use vulkano::descriptor_set::allocator::{StandardDescriptorSetAllocator, StandardDescriptorSetAllocatorCreateInfo};
use vulkano::descriptor_set::{PersistentDescriptorSet, WriteDescriptorSet};
use vulkano::device::physical::{PhysicalDevice, PhysicalDeviceType};
use vulkano::device::{Device, DeviceCreateInfo, DeviceExtensions, Queue, QueueCreateInfo, QueueFlags};
use vulkano::instance::{Instance, InstanceCreateInfo};
use vulkano::memory::allocator::{AllocationCreateInfo, MemoryAllocator, MemoryTypeFilter, StandardMemoryAllocator};
use vulkano::pipeline::compute::ComputePipelineCreateInfo;
use vulkano::pipeline::layout::PipelineDescriptorSetLayoutCreateInfo;
use vulkano::pipeline::{ComputePipeline, Pipeline, PipelineBindPoint, PipelineLayout, PipelineShaderStageCreateInfo};
use vulkano::sync::{self, GpuFuture};
use vulkano::VulkanLibrary;

use crate::batch::PathBatch;
use crate::error::{Error, GpuError};
use crate::glob::MatchOptions;
use crate::gpu::{pack_regex_states, DeviceCaps, Driver, REGEX_FLAG_ANCHORED_END, REGEX_FLAG_ANCHORED_START, REGEX_FLAG_WHOLE_MATCH};
use crate::regex::compile::{CompiledRegex, RegexFlags};

const WORKGROUP_SIZE: u32 = 256;

pub struct VulkanDriver {
	device: Arc<Device>,
	queue: Arc<Queue>,
	memory_allocator: Arc<StandardMemoryAllocator>,
	cmd_buf_allocator: StandardCommandBufferAllocator,
	desc_set_allocator: StandardDescriptorSetAllocator,
	glob_pipeline: Arc<ComputePipeline>,
	regex_pipeline: Arc<ComputePipeline>,
	caps: DeviceCaps,
}

/// A host-writable, device-storage-usable buffer: written from the CPU as plain bytes, then bound
/// directly into a descriptor set (no separate staging-buffer copy, since every device this tool
/// targets exposes a host-visible storage-capable memory type for buffers this small).
fn storage_buffer(allocator: &Arc<StandardMemoryAllocator>, usage: BufferUsage, bytes: &[u8]) -> Result<Subbuffer<[u8]>, Error> {
	let len = bytes.len().max(4) as u64;
	let buffer = Buffer::new_slice::<u8>(
		Arc::clone(allocator) as Arc<dyn MemoryAllocator>,
		BufferCreateInfo { usage, ..Default::default() },
		AllocationCreateInfo { memory_type_filter: MemoryTypeFilter::PREFER_DEVICE | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE, ..Default::default() },
		len,
	)
	.map_err(|e| Error::from(GpuError::from(e)))?;

	{
		let mut write_lock = buffer.write().map_err(|_| Error::GpuError(GpuError::DispatchTimedOut))?;
		write_lock.deref_mut()[..bytes.len()].copy_from_slice(bytes);
	}

	Ok(buffer)
}

fn u32s_to_le_bytes(words: &[u32]) -> Vec<u8> {
	words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

impl VulkanDriver {
	pub fn new() -> Result<Self, Error> {
		let library = VulkanLibrary::new().map_err(GpuError::from)?;
		let instance = Instance::new(library, InstanceCreateInfo::default()).map_err(GpuError::from)?;

		let device_extensions = DeviceExtensions::default();
		let (physical_device, queue_family_index) = Self::select_device(&instance, &device_extensions).ok_or(GpuError::NoSuitableDevice)?;

		info!("Using physical vulkan device: {} (type {:?})", physical_device.properties().device_name, physical_device.properties().device_type);

		let (device, mut queues) = Device::new(
			Arc::clone(&physical_device),
			DeviceCreateInfo {
				queue_create_infos: vec![QueueCreateInfo { queue_family_index, ..Default::default() }],
				enabled_extensions: device_extensions,
				..Default::default()
			},
		)
		.map_err(GpuError::from)?;

		let queue = queues.next().ok_or(GpuError::NoSuitableDevice)?;
		let memory_allocator = Arc::new(StandardMemoryAllocator::new_default(Arc::clone(&device)));
		let cmd_buf_allocator = StandardCommandBufferAllocator::new(Arc::clone(&device), StandardCommandBufferAllocatorCreateInfo::default());
		let desc_set_allocator = StandardDescriptorSetAllocator::new(Arc::clone(&device), StandardDescriptorSetAllocatorCreateInfo::default());

		let glob_pipeline = Self::build_pipeline(&device, shaders::glob::load(Arc::clone(&device)).map_err(GpuError::from)?)?;
		let regex_pipeline = Self::build_pipeline(&device, shaders::regex::load(Arc::clone(&device)).map_err(GpuError::from)?)?;

		let props = physical_device.properties();
		let caps = DeviceCaps {
			max_threads_per_workgroup: props.max_compute_work_group_invocations,
			max_buffer_size: props.max_storage_buffer_range as u64,
			device_local_memory: physical_device
				.memory_properties()
				.memory_heaps
				.iter()
				.filter(|h| h.flags.contains(vulkano::memory::MemoryHeapFlags::DEVICE_LOCAL))
				.map(|h| h.size)
				.sum(),
			unified_memory: physical_device.properties().device_type == PhysicalDeviceType::IntegratedGpu,
		};

		Ok(VulkanDriver { device, queue, memory_allocator, cmd_buf_allocator, desc_set_allocator, glob_pipeline, regex_pipeline, caps })
	}

	fn build_pipeline(device: &Arc<Device>, shader: Arc<vulkano::shader::ShaderModule>) -> Result<Arc<ComputePipeline>, Error> {
		let entry_point = shader.entry_point("main").expect("compute shader has a main entry point");
		let stage = PipelineShaderStageCreateInfo::new(entry_point);
		let layout_info = PipelineDescriptorSetLayoutCreateInfo::from_stages([&stage])
			.into_pipeline_layout_create_info(Arc::clone(device))
			.expect("failed to derive pipeline layout from shader reflection");
		let layout = PipelineLayout::new(Arc::clone(device), layout_info).map_err(GpuError::from)?;

		ComputePipeline::new(Arc::clone(device), None, ComputePipelineCreateInfo::stage_layout(stage, layout)).map_err(|e| Error::from(GpuError::from(e)))
	}

	/// Prefers a discrete GPU, in the same order the teacher's `select_device` does
	fn select_device(instance: &Arc<Instance>, extensions: &DeviceExtensions) -> Option<(Arc<PhysicalDevice>, u32)> {
		instance
			.enumerate_physical_devices()
			.ok()?
			.filter(|p| p.supported_extensions().contains(extensions))
			.filter_map(|p| {
				p.queue_family_properties()
					.iter()
					.position(|q| q.queue_flags.contains(QueueFlags::COMPUTE | QueueFlags::TRANSFER))
					.map(|i| (Arc::clone(&p), i as u32))
			})
			.min_by_key(|(p, _)| match p.properties().device_type {
				PhysicalDeviceType::DiscreteGpu => 0,
				PhysicalDeviceType::IntegratedGpu => 1,
				PhysicalDeviceType::VirtualGpu => 2,
				PhysicalDeviceType::Cpu => 3,
				_ => 4,
			})
	}

	fn dispatch(
		&mut self,
		pipeline: &Arc<ComputePipeline>,
		config_bytes: &[u8],
		binding1_bytes: &[u8],
		names_data: &[u8],
		offsets: &[u32],
		lengths: &[u32],
		extra_bindings: &[(u32, Vec<u8>)],
	) -> Result<(Vec<u32>, u32), Error> {
		let config_buffer = storage_buffer(&self.memory_allocator, BufferUsage::UNIFORM_BUFFER, config_bytes)?;
		let binding1_buffer = storage_buffer(&self.memory_allocator, BufferUsage::STORAGE_BUFFER, binding1_bytes)?;
		let names_buffer = storage_buffer(&self.memory_allocator, BufferUsage::STORAGE_BUFFER, names_data)?;
		let offsets_buffer = storage_buffer(&self.memory_allocator, BufferUsage::STORAGE_BUFFER, &u32s_to_le_bytes(offsets))?;
		let lengths_buffer = storage_buffer(&self.memory_allocator, BufferUsage::STORAGE_BUFFER, &u32s_to_le_bytes(lengths))?;
		let results_buffer = storage_buffer(&self.memory_allocator, BufferUsage::STORAGE_BUFFER, &vec![0u8; offsets.len() * 4])?;
		let counter_buffer = storage_buffer(&self.memory_allocator, BufferUsage::STORAGE_BUFFER, &[0u8; 4])?;

		let mut writes = vec![
			WriteDescriptorSet::buffer(0, Subbuffer::clone(&config_buffer)),
			WriteDescriptorSet::buffer(1, Subbuffer::clone(&binding1_buffer)),
			WriteDescriptorSet::buffer(2, Subbuffer::clone(&names_buffer)),
			WriteDescriptorSet::buffer(3, Subbuffer::clone(&offsets_buffer)),
			WriteDescriptorSet::buffer(4, Subbuffer::clone(&lengths_buffer)),
			WriteDescriptorSet::buffer(5, Subbuffer::clone(&results_buffer)),
			WriteDescriptorSet::buffer(6, Subbuffer::clone(&counter_buffer)),
		];

		let mut extra_buffers = Vec::new();
		for (binding, bytes) in extra_bindings {
			let buffer = storage_buffer(&self.memory_allocator, BufferUsage::STORAGE_BUFFER, bytes)?;
			writes.push(WriteDescriptorSet::buffer(*binding, Subbuffer::clone(&buffer)));
			extra_buffers.push(buffer);
		}

		let layout = Arc::clone(&pipeline.layout().set_layouts()[0]);
		let descriptor_set = PersistentDescriptorSet::new(&self.desc_set_allocator, layout, writes, []).map_err(|e| Error::from(GpuError::from(e)))?;

		let num_names = offsets.len() as u32;
		let num_groups = num_names.div_ceil(WORKGROUP_SIZE).max(1);

		let mut builder = AutoCommandBufferBuilder::primary(&self.cmd_buf_allocator, self.queue.queue_family_index(), CommandBufferUsage::OneTimeSubmit)
			.map_err(|e| Error::from(GpuError::from(e)))?;

		unsafe {
			builder
				.bind_pipeline_compute(Arc::clone(pipeline))
				.map_err(|e| Error::from(GpuError::from(e)))?
				.bind_descriptor_sets(PipelineBindPoint::Compute, Arc::clone(pipeline.layout()), 0, descriptor_set)
				.map_err(|e| Error::from(GpuError::from(e)))?
				.dispatch([num_groups, 1, 1])
				.map_err(|e| Error::from(GpuError::from(e)))?;
		}

		let command_buffer = builder.build().map_err(|e| Error::from(GpuError::from(e)))?;

		let future = sync::now(Arc::clone(&self.device))
			.then_execute(Arc::clone(&self.queue), command_buffer)
			.map_err(|e| Error::from(GpuError::from(e)))?
			.then_signal_fence_and_flush()
			.map_err(|e| Error::from(GpuError::from(e)))?;

		future.wait(Some(Duration::from_secs(30))).map_err(|_| Error::GpuError(GpuError::DispatchTimedOut))?;

		let results_read = results_buffer.read().map_err(|_| Error::GpuError(GpuError::DispatchTimedOut))?;
		let results: Vec<u32> = results_read.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();

		let counter_read = counter_buffer.read().map_err(|_| Error::GpuError(GpuError::DispatchTimedOut))?;
		let count = u32::from_le_bytes(counter_read[0..4].try_into().unwrap());

		Ok((results, count))
	}
}

/// Packs the §4.3 `config` uniform (8 little-endian `u32`s) to raw bytes
fn pack_config(num_names: u32, pattern_len: u32, flags: u32, max_name_len: u32) -> Vec<u8> {
	let words = [num_names, pattern_len, flags, max_name_len, 0, 0, 0, 0];
	u32s_to_le_bytes(&words)
}

impl Driver for VulkanDriver {
	fn caps(&self) -> DeviceCaps {
		self.caps
	}

	fn match_names(&mut self, batch: &PathBatch, pattern: &[u8], options: MatchOptions) -> Result<Vec<bool>, Error> {
		let max_name_len = batch.lengths.iter().copied().max().unwrap_or(0);
		let config_bytes = pack_config(batch.len() as u32, pattern.len() as u32, options.bits(), max_name_len);

		let mut pattern_bytes = pattern.to_vec();
		pattern_bytes.resize(pattern_bytes.len().next_multiple_of(4).max(4), 0);

		let (results, _count) = self.dispatch(
			&Arc::clone(&self.glob_pipeline),
			&config_bytes,
			&pattern_bytes,
			&batch.names_data,
			&batch.offsets,
			&batch.lengths,
			&[],
		)?;

		Ok(results.into_iter().map(|v| v != 0).collect())
	}

	fn regex_match_names(&mut self, batch: &PathBatch, regex: &CompiledRegex, whole_match: bool) -> Result<Vec<bool>, Error> {
		let max_name_len = batch.lengths.iter().copied().max().unwrap_or(0);
		let config_bytes = pack_config(batch.len() as u32, 0, 0, max_name_len);

		let mut regex_flags = 0u32;
		if regex.flags.contains(RegexFlags::ANCHORED_START) {
			regex_flags |= REGEX_FLAG_ANCHORED_START;
		}
		if regex.flags.contains(RegexFlags::ANCHORED_END) {
			regex_flags |= REGEX_FLAG_ANCHORED_END;
		}
		if whole_match {
			regex_flags |= REGEX_FLAG_WHOLE_MATCH;
		}

		let header_words = [regex.states.len() as u32, regex.start_state as u32, regex.num_groups as u32, regex_flags];
		let header_bytes = u32s_to_le_bytes(&header_words);
		let state_bytes = u32s_to_le_bytes(&pack_regex_states(regex));
		let bitmap_bytes = u32s_to_le_bytes(&regex.bitmap_pool);

		let (results, _count) = self.dispatch(
			&Arc::clone(&self.regex_pipeline),
			&config_bytes,
			&state_bytes,
			&batch.names_data,
			&batch.offsets,
			&batch.lengths,
			&[(7, header_bytes), (8, bitmap_bytes)],
		)?;

		Ok(results.into_iter().map(|v| v != 0).collect())
	}
}
