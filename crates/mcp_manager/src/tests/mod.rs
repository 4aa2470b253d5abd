mod config_loading;
