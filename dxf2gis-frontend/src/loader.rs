use dxf2gis_config::{AppConfig, BlockModeSetting, DriverSetting, DwgConverterSetting};
use dxf2gis_engine::{BlockMode, Converter, EventSink, OutputDriver};
use dxf2gis_io::{ConverterPreference, DrawingFileLoader, DwgFacade};
use tracing::debug;

/// 按配置构造图纸读取器：`.dxf` 直接解析，`.dwg` 经外部转换器。
pub fn drawing_loader(config: &AppConfig) -> DrawingFileLoader {
    let preference = match config.dwg.converter {
        DwgConverterSetting::Auto => ConverterPreference::Auto,
        DwgConverterSetting::Oda => ConverterPreference::Oda,
        DwgConverterSetting::Libredwg => ConverterPreference::Libredwg,
    };
    debug!(?preference, oda_path = ?config.dwg.oda_path, "DWG 转换器设置");
    DrawingFileLoader::new(DwgFacade::new(preference, config.dwg.oda_path.clone()))
}

pub fn converter(config: &AppConfig, events: EventSink) -> Converter {
    Converter::new(drawing_loader(config)).with_events(events)
}

pub fn block_mode(setting: BlockModeSetting) -> BlockMode {
    match setting {
        BlockModeSetting::Explode => BlockMode::Explode,
        BlockModeSetting::KeepMerge => BlockMode::KeepMerge,
    }
}

pub fn output_driver(setting: DriverSetting) -> OutputDriver {
    match setting {
        DriverSetting::Shapefile => OutputDriver::Shapefile,
        DriverSetting::Geopackage => OutputDriver::GeoPackage,
    }
}
