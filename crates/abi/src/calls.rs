use alloy_sol_types::sol;

sol! {
    #[derive(Debug)]
    struct GuardianSetData {
        address[] keys;
        uint32 expirationTime;
    }

    #[derive(Debug)]
    function getCurrentGuardianSetIndex() external view returns (uint32);

    #[derive(Debug)]
    function getGuardianSet(uint32 index) external view returns (GuardianSetData memory);

    #[derive(Debug)]
    function getConfiguration(address emitterAddress) external view returns (bytes32);
}
