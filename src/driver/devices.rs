//! Host API and device enumeration via cpal.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SupportedStreamConfigRange};

use super::cpal_backend::{cpal_sample_format, cpal_sample_rate};
use super::StreamParams;
use crate::format::SampleFormat;
use crate::DriverError;

/// Capabilities of one audio device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Device name as reported by the host.
    pub name: String,
    /// Most input channels any supported configuration offers.
    pub max_input_channels: u16,
    /// Most output channels any supported configuration offers.
    pub max_output_channels: u16,
    /// Sample rate of the device's default configuration, if it has one.
    pub default_sample_rate: Option<f64>,
    /// Whether this is the host's default input device.
    pub is_default_input: bool,
    /// Whether this is the host's default output device.
    pub is_default_output: bool,
}

/// Direction of a device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Input,
    Output,
}

fn configs_error(err: cpal::SupportedStreamConfigsError) -> DriverError {
    match err {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => DriverError::DeviceUnavailable,
        cpal::SupportedStreamConfigsError::InvalidArgument => DriverError::InvalidDevice,
        cpal::SupportedStreamConfigsError::BackendSpecific { err } => {
            tracing::error!("cpal backend error while querying configs: {}", err);
            DriverError::UnanticipatedHostError
        }
    }
}

fn supported_configs(
    device: &Device,
    direction: Direction,
) -> Result<Vec<SupportedStreamConfigRange>, DriverError> {
    let ranges: Vec<_> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map_err(configs_error)?
            .collect(),
        Direction::Output => device
            .supported_output_configs()
            .map_err(configs_error)?
            .collect(),
    };
    Ok(ranges)
}

fn max_channels(device: &Device, direction: Direction) -> u16 {
    supported_configs(device, direction)
        .map(|ranges| ranges.iter().map(SupportedStreamConfigRange::channels).max())
        .ok()
        .flatten()
        .unwrap_or(0)
}

/// Checks one direction of a stream against a device's supported configurations.
pub(crate) fn check_direction(
    device: &Device,
    direction: Direction,
    channels: u16,
    format: SampleFormat,
    sample_rate: f64,
) -> Result<(), DriverError> {
    let wanted_format = cpal_sample_format(format)?;
    let wanted_rate = cpal_sample_rate(sample_rate)?;
    let ranges = supported_configs(device, direction)?;

    let max = ranges.iter().map(SupportedStreamConfigRange::channels).max();
    if max.map_or(true, |max| channels > max) {
        return Err(DriverError::InvalidChannelCount);
    }

    let mut with_format = ranges
        .iter()
        .filter(|r| r.sample_format() == wanted_format)
        .peekable();
    if with_format.peek().is_none() {
        return Err(DriverError::SampleFormatNotSupported);
    }
    if !with_format.any(|r| r.min_sample_rate() <= wanted_rate && wanted_rate <= r.max_sample_rate())
    {
        return Err(DriverError::InvalidSampleRate);
    }
    Ok(())
}

/// Names of the host APIs compiled into this build.
pub fn host_apis() -> Vec<&'static str> {
    cpal::available_hosts().iter().map(|id| id.name()).collect()
}

/// Name of the host API streams are opened on.
pub fn default_host_api() -> &'static str {
    cpal::default_host().id().name()
}

/// Lists every device on the default host.
///
/// # Errors
///
/// Returns `UnanticipatedHostError` if the host cannot enumerate devices.
pub fn list_devices() -> Result<Vec<DeviceInfo>, DriverError> {
    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host.devices().map_err(|e| {
        tracing::error!("failed to enumerate devices: {}", e);
        DriverError::UnanticipatedHostError
    })?;

    let infos = devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let default_sample_rate = device
                .default_input_config()
                .or_else(|_| device.default_output_config())
                .ok()
                .map(|config| f64::from(config.sample_rate().0));

            Some(DeviceInfo {
                is_default_input: default_input.as_deref() == Some(name.as_str()),
                is_default_output: default_output.as_deref() == Some(name.as_str()),
                max_input_channels: max_channels(&device, Direction::Input),
                max_output_channels: max_channels(&device, Direction::Output),
                default_sample_rate,
                name,
            })
        })
        .collect();

    Ok(infos)
}

/// Gets the name of the default input device, if any.
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| d.name().ok())
}

/// Gets the name of the default output device, if any.
pub fn default_output_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

/// Checks whether the default devices can open a stream with `params`.
///
/// # Errors
///
/// The error [`crate::CpalDriver`] would report when opening the stream:
/// `InvalidDevice` when a default device is missing, otherwise the first
/// rejected channel count, format or rate.
pub fn is_format_supported(params: &StreamParams) -> Result<(), DriverError> {
    let host = cpal::default_host();

    if params.input_channels() > 0 {
        let device = host
            .default_input_device()
            .ok_or(DriverError::InvalidDevice)?;
        check_direction(
            &device,
            Direction::Input,
            params.input_channels(),
            params.format(),
            params.sample_rate(),
        )?;
    }
    if params.output_channels() > 0 {
        let device = host
            .default_output_device()
            .ok_or(DriverError::InvalidDevice)?;
        check_direction(
            &device,
            Direction::Output,
            params.output_channels(),
            params.format(),
            params.sample_rate(),
        )?;
    }
    Ok(())
}
